//! `NIfTI` header parsing and affine patching.
//!
//! Supports NIfTI-1 (348-byte header) and NIfTI-2 (540-byte header) with
//! automatic version and endianness detection. Only the fields needed to
//! locate a template in world space are modelled; everything else in a header
//! is carried through untouched when the affine is rewritten.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::affine::Affine;
use crate::error::{Error, Result};

/// NIfTI format version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NiftiVersion {
    /// NIfTI-1 format (348-byte header, 16-bit dimensions)
    #[default]
    Nifti1,
    /// NIfTI-2 format (540-byte header, 64-bit dimensions)
    Nifti2,
}

impl NiftiVersion {
    /// Header size in bytes for this version.
    pub const fn header_size(self) -> usize {
        self.layout().size
    }

    /// Default vox_offset for this version (header size + extension flag).
    pub const fn default_vox_offset(self) -> i64 {
        match self {
            Self::Nifti1 => 352,
            Self::Nifti2 => 544,
        }
    }

    const fn layout(self) -> &'static Layout {
        match self {
            Self::Nifti1 => &LAYOUT_V1,
            Self::Nifti2 => &LAYOUT_V2,
        }
    }
}

/// Byte offsets of the modelled fields for one header version.
///
/// NIfTI-1 stores dimensions as i16, transform codes as i16 and reals as f32;
/// NIfTI-2 widens them to i64, i32 and f64.
struct Layout {
    size: usize,
    magic: usize,
    magic_bytes: &'static [&'static [u8]],
    datatype: usize,
    bitpix: usize,
    dim: usize,
    pixdim: usize,
    vox_offset: usize,
    descrip: usize,
    qform_code: usize,
    sform_code: usize,
    quatern: usize,
    qoffset: usize,
    srow: [usize; 3],
    wide: bool,
}

const LAYOUT_V1: Layout = Layout {
    size: 348,
    magic: 344,
    magic_bytes: &[b"n+1\0".as_slice(), b"ni1\0".as_slice()],
    datatype: 70,
    bitpix: 72,
    dim: 40,
    pixdim: 76,
    vox_offset: 108,
    descrip: 148,
    qform_code: 252,
    sform_code: 254,
    quatern: 256,
    qoffset: 268,
    srow: [280, 296, 312],
    wide: false,
};

const LAYOUT_V2: Layout = Layout {
    size: 540,
    magic: 4,
    magic_bytes: &[b"n+2\0\r\n\x1a\n".as_slice(), b"ni2\0\r\n\x1a\n".as_slice()],
    datatype: 12,
    bitpix: 14,
    dim: 16,
    pixdim: 104,
    vox_offset: 168,
    descrip: 240,
    qform_code: 344,
    sform_code: 348,
    quatern: 352,
    qoffset: 376,
    srow: [400, 432, 464],
    wide: true,
};

impl Layout {
    const fn real_width(&self) -> usize {
        if self.wide {
            8
        } else {
            4
        }
    }

    const fn dim_width(&self) -> usize {
        if self.wide {
            8
        } else {
            2
        }
    }

    fn read_real<E: ByteOrder>(&self, bytes: &[u8], offset: usize) -> f64 {
        if self.wide {
            E::read_f64(&bytes[offset..offset + 8])
        } else {
            f64::from(E::read_f32(&bytes[offset..offset + 4]))
        }
    }

    fn write_real<E: ByteOrder>(&self, bytes: &mut [u8], offset: usize, value: f64) {
        if self.wide {
            E::write_f64(&mut bytes[offset..offset + 8], value);
        } else {
            E::write_f32(&mut bytes[offset..offset + 4], value as f32);
        }
    }

    fn read_reals<E: ByteOrder, const N: usize>(&self, bytes: &[u8], offset: usize) -> [f64; N] {
        let width = self.real_width();
        std::array::from_fn(|i| self.read_real::<E>(bytes, offset + i * width))
    }

    fn write_reals<E: ByteOrder>(&self, bytes: &mut [u8], offset: usize, values: &[f64]) {
        let width = self.real_width();
        for (i, &v) in values.iter().enumerate() {
            self.write_real::<E>(bytes, offset + i * width, v);
        }
    }

    fn read_dim<E: ByteOrder>(&self, bytes: &[u8], index: usize) -> i64 {
        let offset = self.dim + index * self.dim_width();
        if self.wide {
            E::read_i64(&bytes[offset..offset + 8])
        } else {
            i64::from(E::read_i16(&bytes[offset..offset + 2]))
        }
    }

    fn write_dim<E: ByteOrder>(&self, bytes: &mut [u8], index: usize, value: i64) {
        let offset = self.dim + index * self.dim_width();
        if self.wide {
            E::write_i64(&mut bytes[offset..offset + 8], value);
        } else {
            E::write_i16(&mut bytes[offset..offset + 2], value as i16);
        }
    }

    fn read_code<E: ByteOrder>(&self, bytes: &[u8], offset: usize) -> i32 {
        if self.wide {
            E::read_i32(&bytes[offset..offset + 4])
        } else {
            i32::from(E::read_i16(&bytes[offset..offset + 2]))
        }
    }

    fn write_code<E: ByteOrder>(&self, bytes: &mut [u8], offset: usize, value: i32) {
        if self.wide {
            E::write_i32(&mut bytes[offset..offset + 4], value);
        } else {
            E::write_i16(&mut bytes[offset..offset + 2], value as i16);
        }
    }
}

/// `NIfTI` data type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum DataType {
    /// Unsigned 8-bit integer
    UInt8 = 2,
    /// Signed 16-bit integer
    Int16 = 4,
    /// Signed 32-bit integer
    Int32 = 8,
    /// 32-bit floating point
    Float32 = 16,
    /// 64-bit floating point
    Float64 = 64,
    /// Signed 8-bit integer
    Int8 = 256,
    /// Unsigned 16-bit integer
    UInt16 = 512,
    /// Unsigned 32-bit integer
    UInt32 = 768,
    /// Signed 64-bit integer
    Int64 = 1024,
    /// Unsigned 64-bit integer
    UInt64 = 1280,
}

impl DataType {
    /// Parse from `NIfTI` datatype code.
    pub fn from_code(code: i16) -> Result<Self> {
        match code {
            2 => Ok(Self::UInt8),
            4 => Ok(Self::Int16),
            8 => Ok(Self::Int32),
            16 => Ok(Self::Float32),
            64 => Ok(Self::Float64),
            256 => Ok(Self::Int8),
            512 => Ok(Self::UInt16),
            768 => Ok(Self::UInt32),
            1024 => Ok(Self::Int64),
            1280 => Ok(Self::UInt64),
            _ => Err(Error::UnsupportedDataType(code)),
        }
    }

    /// Size of each element in bytes.
    pub const fn byte_size(self) -> usize {
        match self {
            Self::UInt8 | Self::Int8 => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
            Self::Int64 | Self::UInt64 | Self::Float64 => 8,
        }
    }
}

/// Header fields describing where a volume sits in world space.
#[derive(Debug, Clone, PartialEq)]
pub struct NiftiHeader {
    /// NIfTI format version.
    pub version: NiftiVersion,
    /// Number of dimensions (1-7).
    pub ndim: u8,
    /// Size along each dimension.
    pub dim: [i64; 7],
    /// Data type.
    pub datatype: DataType,
    /// qfac at index 0, voxel sizes at 1..=ndim.
    pub pixdim: [f64; 8],
    /// Data offset in file.
    pub vox_offset: i64,
    /// Description string.
    pub descrip: String,
    /// qform transform code.
    pub qform_code: i32,
    /// sform transform code.
    pub sform_code: i32,
    /// Quaternion parameters b, c, d.
    pub quatern: [f64; 3],
    /// qform translation.
    pub qoffset: [f64; 3],
    /// sform rows.
    pub srow: [[f64; 4]; 3],
    /// File endianness (true = little endian).
    pub(crate) little_endian: bool,
}

impl Default for NiftiHeader {
    fn default() -> Self {
        Self {
            version: NiftiVersion::Nifti1,
            ndim: 3,
            dim: [1, 1, 1, 1, 1, 1, 1],
            datatype: DataType::Float32,
            pixdim: [1.0; 8],
            vox_offset: 352,
            descrip: String::new(),
            qform_code: 0,
            sform_code: 1,
            quatern: [0.0; 3],
            qoffset: [0.0; 3],
            srow: [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
            ],
            little_endian: true,
        }
    }
}

/// Detect version and byte order from the `sizeof_hdr` field.
fn detect(bytes: &[u8]) -> Result<(NiftiVersion, bool)> {
    if bytes.len() < 4 {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "header too short to detect version",
        )));
    }

    let le = LittleEndian::read_i32(&bytes[0..4]);
    let be = BigEndian::read_i32(&bytes[0..4]);
    let detected = match (le, be) {
        (348, _) => (NiftiVersion::Nifti1, true),
        (_, 348) => (NiftiVersion::Nifti1, false),
        (540, _) => (NiftiVersion::Nifti2, true),
        (_, 540) => (NiftiVersion::Nifti2, false),
        _ => {
            return Err(Error::InvalidMagic([
                bytes[0], bytes[1], bytes[2], bytes[3],
            ]))
        }
    };

    let required = detected.0.header_size();
    if bytes.len() < required {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!(
                "header too short: got {} bytes, need {} for {:?}",
                bytes.len(),
                required,
                detected.0
            ),
        )));
    }
    Ok(detected)
}

impl NiftiHeader {
    /// Size of NIfTI-1 header in bytes.
    pub const SIZE: usize = 348;

    /// Size of NIfTI-2 header in bytes.
    pub const SIZE_V2: usize = 540;

    /// Read header from bytes with automatic version and endianness detection.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        match detect(bytes)? {
            (version, true) => Self::parse::<LittleEndian>(bytes, version, true),
            (version, false) => Self::parse::<BigEndian>(bytes, version, false),
        }
    }

    fn parse<E: ByteOrder>(bytes: &[u8], version: NiftiVersion, little_endian: bool) -> Result<Self> {
        let layout = version.layout();

        let magic = &bytes[layout.magic..layout.magic + layout.magic_bytes[0].len()];
        if !layout.magic_bytes.contains(&magic) {
            return Err(Error::InvalidMagic([
                magic[0], magic[1], magic[2], magic[3],
            ]));
        }

        let ndim_raw = layout.read_dim::<E>(bytes, 0);
        if !(1..=7).contains(&ndim_raw) {
            return Err(Error::InvalidDimensions(format!(
                "ndim must be 1..=7, got {}",
                ndim_raw
            )));
        }

        let mut dim = [0i64; 7];
        for (i, d) in dim.iter_mut().enumerate() {
            *d = layout.read_dim::<E>(bytes, i + 1);
            if *d < 0 {
                return Err(Error::InvalidDimensions(format!(
                    "dimension {} has negative value: {}",
                    i, *d
                )));
            }
        }

        let datatype = DataType::from_code(E::read_i16(&bytes[layout.datatype..]))?;
        let bitpix = E::read_i16(&bytes[layout.bitpix..]);
        if bitpix as usize != datatype.byte_size() * 8 {
            return Err(Error::InvalidDimensions(format!(
                "bitpix {} does not match datatype {:?}",
                bitpix, datatype
            )));
        }

        let vox_offset = if layout.wide {
            E::read_i64(&bytes[layout.vox_offset..])
        } else {
            let raw = E::read_f32(&bytes[layout.vox_offset..]);
            if !raw.is_finite() || raw.fract() != 0.0 {
                return Err(Error::InvalidDimensions(format!(
                    "vox_offset must be a finite integer, got {}",
                    raw
                )));
            }
            raw as i64
        };

        let descrip = String::from_utf8_lossy(&bytes[layout.descrip..layout.descrip + 80])
            .trim_end_matches('\0')
            .to_string();

        let header = Self {
            version,
            ndim: ndim_raw as u8,
            dim,
            datatype,
            pixdim: layout.read_reals::<E, 8>(bytes, layout.pixdim),
            vox_offset,
            descrip,
            qform_code: layout.read_code::<E>(bytes, layout.qform_code),
            sform_code: layout.read_code::<E>(bytes, layout.sform_code),
            quatern: layout.read_reals::<E, 3>(bytes, layout.quatern),
            qoffset: layout.read_reals::<E, 3>(bytes, layout.qoffset),
            srow: [
                layout.read_reals::<E, 4>(bytes, layout.srow[0]),
                layout.read_reals::<E, 4>(bytes, layout.srow[1]),
                layout.read_reals::<E, 4>(bytes, layout.srow[2]),
            ],
            little_endian,
        };

        header.validate()?;
        Ok(header)
    }

    /// Serialize to a fresh header buffer in this header's version and byte order.
    pub fn to_bytes(&self) -> Vec<u8> {
        if self.little_endian {
            self.encode::<LittleEndian>()
        } else {
            self.encode::<BigEndian>()
        }
    }

    fn encode<E: ByteOrder>(&self) -> Vec<u8> {
        let layout = self.version.layout();
        let mut buf = vec![0u8; layout.size];

        E::write_i32(&mut buf[0..4], layout.size as i32);
        layout.write_dim::<E>(&mut buf, 0, i64::from(self.ndim));
        for (i, &d) in self.dim.iter().enumerate() {
            layout.write_dim::<E>(&mut buf, i + 1, d);
        }
        E::write_i16(&mut buf[layout.datatype..], self.datatype as i16);
        E::write_i16(
            &mut buf[layout.bitpix..],
            (self.datatype.byte_size() * 8) as i16,
        );
        layout.write_reals::<E>(&mut buf, layout.pixdim, &self.pixdim);
        if layout.wide {
            E::write_i64(&mut buf[layout.vox_offset..], self.vox_offset);
        } else {
            E::write_f32(&mut buf[layout.vox_offset..], self.vox_offset as f32);
        }

        let descrip = self.descrip.as_bytes();
        let len = descrip.len().min(79);
        buf[layout.descrip..layout.descrip + len].copy_from_slice(&descrip[..len]);

        layout.write_code::<E>(&mut buf, layout.qform_code, self.qform_code);
        layout.write_reals::<E>(&mut buf, layout.quatern, &self.quatern);
        layout.write_reals::<E>(&mut buf, layout.qoffset, &self.qoffset);
        self.write_sform::<E>(&mut buf);

        let magic = layout.magic_bytes[0];
        buf[layout.magic..layout.magic + magic.len()].copy_from_slice(magic);
        buf
    }

    fn write_sform<E: ByteOrder>(&self, buf: &mut [u8]) {
        let layout = self.version.layout();
        layout.write_code::<E>(buf, layout.sform_code, self.sform_code);
        for (row, &offset) in self.srow.iter().zip(&layout.srow) {
            layout.write_reals::<E>(buf, offset, row);
        }
    }

    /// The voxel-to-world affine (sform, else qform, else pixdim scaling).
    pub fn affine(&self) -> Affine {
        if self.sform_code > 0 {
            let [x, y, z] = self.srow;
            Affine::from_rows([x, y, z, [0.0, 0.0, 0.0, 1.0]])
        } else if self.qform_code > 0 {
            self.qform_to_affine()
        } else {
            Affine::diagonal(self.pixdim[1], self.pixdim[2], self.pixdim[3])
        }
    }

    /// Replace the sform with `affine` and update voxel sizes to match.
    ///
    /// A qform would contradict the new sform, so it is disabled.
    pub fn set_affine(&mut self, affine: &Affine) {
        let rows = affine.rows();
        self.srow = [rows[0], rows[1], rows[2]];
        if self.sform_code <= 0 {
            self.sform_code = 2;
        }
        self.qform_code = 0;
        let [sx, sy, sz] = affine.voxel_sizes();
        self.pixdim[1] = sx;
        self.pixdim[2] = sy;
        self.pixdim[3] = sz;
    }

    /// Rewrite the transform fields of an existing header buffer in place.
    ///
    /// `bytes` must hold the header this value was parsed from; every field
    /// this type does not model is left untouched.
    pub fn patch_bytes(&self, bytes: &mut [u8]) -> Result<()> {
        let (version, little_endian) = detect(bytes)?;
        if version != self.version || little_endian != self.little_endian {
            return Err(Error::InvalidDimensions(format!(
                "header buffer is {:?} ({}), expected {:?}",
                version,
                if little_endian { "LE" } else { "BE" },
                self.version
            )));
        }
        if little_endian {
            self.patch::<LittleEndian>(bytes);
        } else {
            self.patch::<BigEndian>(bytes);
        }
        Ok(())
    }

    fn patch<E: ByteOrder>(&self, bytes: &mut [u8]) {
        let layout = self.version.layout();
        layout.write_reals::<E>(bytes, layout.pixdim, &self.pixdim);
        layout.write_code::<E>(bytes, layout.qform_code, self.qform_code);
        self.write_sform::<E>(bytes);
    }

    /// Convert quaternion representation to an affine matrix.
    #[allow(clippy::many_single_char_names)]
    fn qform_to_affine(&self) -> Affine {
        let [b, c, d] = self.quatern;
        let a = (1.0 - b * b - c * c - d * d).max(0.0).sqrt();

        let qfac = if self.pixdim[0] < 0.0 { -1.0 } else { 1.0 };
        let [i, j, k] = [self.pixdim[1].abs(), self.pixdim[2], self.pixdim[3] * qfac];

        Affine::from_rows([
            [
                (a * a + b * b - c * c - d * d) * i,
                2.0 * (b * c - a * d) * j,
                2.0 * (b * d + a * c) * k,
                self.qoffset[0],
            ],
            [
                2.0 * (b * c + a * d) * i,
                (a * a - b * b + c * c - d * d) * j,
                2.0 * (c * d - a * b) * k,
                self.qoffset[1],
            ],
            [
                2.0 * (b * d - a * c) * i,
                2.0 * (c * d + a * b) * j,
                (a * a - b * b - c * c + d * d) * k,
                self.qoffset[2],
            ],
            [0.0, 0.0, 0.0, 1.0],
        ])
    }

    /// Image shape (up to ndim elements).
    pub fn shape(&self) -> Vec<usize> {
        self.dim[..self.ndim as usize]
            .iter()
            .map(|&d| d as usize)
            .collect()
    }

    /// Total number of voxels.
    pub fn num_voxels(&self) -> usize {
        self.shape().iter().product()
    }

    /// Total size of image data in bytes.
    pub fn data_size(&self) -> usize {
        self.num_voxels() * self.datatype.byte_size()
    }

    /// Returns true if file is little endian.
    pub fn is_little_endian(&self) -> bool {
        self.little_endian
    }

    /// Validate header fields for basic NIfTI invariants.
    pub fn validate(&self) -> Result<()> {
        if self.ndim == 0 || self.ndim > 7 {
            return Err(Error::InvalidDimensions(format!(
                "ndim must be 1..=7, got {}",
                self.ndim
            )));
        }
        if self.ndim < 3 {
            return Err(Error::InvalidDimensions(format!(
                "template must be a volume (ndim >= 3), got {}",
                self.ndim
            )));
        }

        for i in 0..self.ndim as usize {
            if self.dim[i] == 0 {
                return Err(Error::InvalidDimensions(format!("dimension {} is zero", i)));
            }
        }

        let min_offset = self.version.header_size() as i64;
        if self.vox_offset < min_offset {
            return Err(Error::InvalidDimensions(format!(
                "vox_offset {} before header end ({})",
                self.vox_offset, min_offset
            )));
        }

        self.dim[..self.ndim as usize]
            .iter()
            .try_fold(self.datatype.byte_size(), |acc, &d| {
                acc.checked_mul(d as usize)
            })
            .ok_or_else(|| Error::InvalidDimensions("data size overflow".into()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mni_header(version: NiftiVersion) -> NiftiHeader {
        NiftiHeader {
            version,
            dim: [182, 218, 182, 1, 1, 1, 1],
            vox_offset: version.default_vox_offset(),
            sform_code: 4,
            qform_code: 4,
            srow: [
                [-1.0, 0.0, 0.0, 90.0],
                [0.0, 1.0, 0.0, -126.0],
                [0.0, 0.0, 1.0, -72.0],
            ],
            ..NiftiHeader::default()
        }
    }

    #[test]
    fn test_nifti1_roundtrip() {
        let header = mni_header(NiftiVersion::Nifti1);
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), NiftiHeader::SIZE);

        let parsed = NiftiHeader::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.version, NiftiVersion::Nifti1);
        assert_eq!(parsed.shape(), vec![182, 218, 182]);
        assert_eq!(parsed.affine(), header.affine());
    }

    #[test]
    fn test_nifti2_big_endian_roundtrip() {
        let mut header = mni_header(NiftiVersion::Nifti2);
        header.little_endian = false;
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), NiftiHeader::SIZE_V2);

        let parsed = NiftiHeader::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.version, NiftiVersion::Nifti2);
        assert!(!parsed.is_little_endian());
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_invalid_magic() {
        let mut bytes = mni_header(NiftiVersion::Nifti1).to_bytes();
        bytes[344..348].copy_from_slice(b"BAD!");
        assert!(matches!(
            NiftiHeader::from_bytes(&bytes),
            Err(Error::InvalidMagic(_))
        ));
    }

    #[test]
    fn test_truncated_header() {
        let bytes = mni_header(NiftiVersion::Nifti1).to_bytes();
        assert!(matches!(
            NiftiHeader::from_bytes(&bytes[..200]),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn test_unsupported_datatype() {
        let mut bytes = mni_header(NiftiVersion::Nifti1).to_bytes();
        LittleEndian::write_i16(&mut bytes[70..72], 9999);
        assert!(matches!(
            NiftiHeader::from_bytes(&bytes),
            Err(Error::UnsupportedDataType(9999))
        ));
    }

    #[test]
    fn test_qform_fallback() {
        let mut header = mni_header(NiftiVersion::Nifti1);
        header.sform_code = 0;
        header.quatern = [0.0, 0.0, 0.0];
        header.qoffset = [1.0, 2.0, 3.0];
        header.pixdim = [1.0, 2.0, 2.0, 2.0, 0.0, 0.0, 0.0, 0.0];
        let affine = header.affine();
        assert_eq!(affine.rows()[0][0], 2.0);
        assert_eq!(affine.translation(), [1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_patch_preserves_other_fields() {
        let header = mni_header(NiftiVersion::Nifti1);
        let mut bytes = header.to_bytes();
        // A field outside the model: scl_slope at offset 112.
        LittleEndian::write_f32(&mut bytes[112..116], 2.5);

        let mut updated = NiftiHeader::from_bytes(&bytes).unwrap();
        let scaled = Affine::from_rows([
            [-0.5, 0.0, 0.0, 45.0],
            [0.0, 0.5, 0.0, -63.0],
            [0.0, 0.0, 0.25, -18.0],
            [0.0, 0.0, 0.0, 1.0],
        ]);
        updated.set_affine(&scaled);
        updated.patch_bytes(&mut bytes).unwrap();

        assert_eq!(LittleEndian::read_f32(&bytes[112..116]), 2.5);
        let reparsed = NiftiHeader::from_bytes(&bytes).unwrap();
        assert_eq!(reparsed.affine(), scaled);
        assert_eq!(reparsed.sform_code, 4);
        assert_eq!(reparsed.qform_code, 0);
        assert_eq!(reparsed.pixdim[1..4], [0.5, 0.5, 0.25]);
    }

    #[test]
    fn test_rejects_2d_images() {
        let mut header = mni_header(NiftiVersion::Nifti1);
        header.ndim = 2;
        assert!(matches!(
            header.validate(),
            Err(Error::InvalidDimensions(_))
        ));
    }
}
