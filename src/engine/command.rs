use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use tokio::process::Command;
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::resample::{template_dir, ResliceRequest, VolumeResampler};
use crate::volume::VolumeHandle;

const LOG_TAIL_BYTES: u64 = 2048;

/// Drives an external reslicing program.
///
/// The program is invoked as
///
/// ```text
/// <program> [args..] --input <template> --affine <file> --interp <0|1|2>
///           --which 1 --mean 0 --prefix <prefix> --workdir <dir>
/// ```
///
/// where the affine file holds four whitespace-separated rows. The program
/// must write `<dir>/<prefix><template file name>` and exit with status 0.
/// Its stdout and stderr go to `<dir>/<prefix>reslice.log`, which is removed
/// on success. A program still running when the request's timeout elapses
/// is killed and reaped before [`Error::EngineTimeout`] is returned.
#[derive(Debug, Clone)]
pub struct CommandEngine {
    program: PathBuf,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl CommandEngine {
    /// Engine for the program at `program`.
    ///
    /// Fails with [`Error::Configuration`] if no file exists there.
    pub fn locate(program: impl Into<PathBuf>) -> Result<Self> {
        let program = program.into();
        if !program.is_file() {
            return Err(Error::Configuration(format!(
                "resampling engine not found at {}",
                program.display()
            )));
        }
        Ok(Self {
            program,
            args: Vec::new(),
            working_dir: None,
        })
    }

    /// Arguments placed before the request arguments, e.g. a script path
    /// when `program` is an interpreter.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Write results into `dir` instead of the template's directory.
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    fn write_affine_file(request: &ResliceRequest, path: &Path) -> Result<()> {
        let mut file = File::create(path)?;
        for row in request.affine.rows() {
            writeln!(file, "{:.17e} {:.17e} {:.17e} {:.17e}", row[0], row[1], row[2], row[3])?;
        }
        file.flush()?;
        Ok(())
    }

    fn run(&self, request: &ResliceRequest, affine_file: &Path, log_file: &Path) -> Result<()> {
        let log = File::create(log_file)?;
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg("--input")
            .arg(request.volume.path())
            .arg("--affine")
            .arg(affine_file)
            .arg("--interp")
            .arg(request.interpolation.code().to_string())
            .arg("--which")
            .arg(request.which.code().to_string())
            .arg("--mean")
            .arg(if request.mean { "1" } else { "0" })
            .arg("--prefix")
            .arg(&request.prefix)
            .arg("--workdir")
            .arg(&request.working_dir)
            .stdin(Stdio::null())
            .stdout(log.try_clone()?)
            .stderr(log)
            .kill_on_drop(true);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let status = runtime.block_on(self.supervise(&mut command, request))?;

        if status.success() {
            Ok(())
        } else {
            Err(Error::ExternalEngine(format!(
                "{} exited with {}: {}",
                self.program.display(),
                status,
                read_tail(log_file).trim()
            )))
        }
    }

    async fn supervise(&self, command: &mut Command, request: &ResliceRequest) -> Result<ExitStatus> {
        let mut child = command.spawn().map_err(|e| {
            Error::ExternalEngine(format!("failed to start {}: {e}", self.program.display()))
        })?;

        let Some(limit) = request.timeout else {
            return Ok(child.wait().await?);
        };
        match timeout(limit, child.wait()).await {
            Ok(status) => Ok(status?),
            Err(_) => {
                // kill() also waits, so nothing is left writing once we return.
                child.kill().await?;
                Err(Error::EngineTimeout(limit))
            }
        }
    }
}

fn read_tail(path: &Path) -> String {
    let mut buf = Vec::new();
    let read = File::open(path).and_then(|mut file| {
        let len = file.metadata()?.len();
        file.seek(SeekFrom::Start(len.saturating_sub(LOG_TAIL_BYTES)))?;
        file.read_to_end(&mut buf)
    });
    match read {
        Ok(_) => String::from_utf8_lossy(&buf).into_owned(),
        Err(_) => String::new(),
    }
}

impl VolumeResampler for CommandEngine {
    fn name(&self) -> &str {
        "command"
    }

    fn working_dir(&self, volume: &VolumeHandle) -> PathBuf {
        self.working_dir
            .clone()
            .unwrap_or_else(|| template_dir(volume))
    }

    fn reslice(&self, request: &ResliceRequest) -> Result<()> {
        std::fs::create_dir_all(&request.working_dir)?;
        let affine_file = request
            .working_dir
            .join(format!("{}affine.txt", request.prefix));
        let log_file = request
            .working_dir
            .join(format!("{}reslice.log", request.prefix));

        Self::write_affine_file(request, &affine_file)?;
        let result = self.run(request, &affine_file, &log_file);
        let _ = std::fs::remove_file(&affine_file);

        match &result {
            Ok(()) => {
                let _ = std::fs::remove_file(&log_file);
            }
            Err(e) => {
                tracing::warn!(log = %log_file.display(), error = %e, "reslice command failed");
            }
        }
        result
    }
}
