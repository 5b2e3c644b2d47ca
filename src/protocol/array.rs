//! Numeric array payloads for the peer link
//!
//! Blob frames on the peer link carry arrays in the NumPy `.npy` format so the
//! other side can load them with `numpy.load`. Arrays are written as version 1.0,
//! little-endian `f8`, C order. Reading also accepts `f4`, `i4` and `i8` element types.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

const NPY_MAGIC: &[u8; 6] = b"\x93NUMPY";

/// Header alignment used by current NumPy writers
const NPY_ALIGN: usize = 64;

/// Array payload errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ArrayError {
    #[error("Not an NPY payload")]
    BadMagic,

    #[error("Unsupported NPY version {0}.{1}")]
    UnsupportedVersion(u8, u8),

    #[error("Malformed NPY header: {0}")]
    MalformedHeader(String),

    #[error("Unsupported element type {0}")]
    UnsupportedDtype(String),

    #[error("Fortran-ordered arrays are not supported")]
    FortranOrder,

    #[error("Payload holds {actual} bytes, shape needs {expected}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("Shape {shape:?} does not match {len} elements")]
    ShapeMismatch { shape: Vec<usize>, len: usize },
}

pub type ArrayResult<T> = Result<T, ArrayError>;

/// A dense n-dimensional array of doubles in C order
#[derive(Debug, Clone, PartialEq)]
pub struct NumericArray {
    shape: Vec<usize>,
    data: Vec<f64>,
}

impl NumericArray {
    /// Create an array, checking that the shape covers the data exactly
    pub fn new(shape: Vec<usize>, data: Vec<f64>) -> ArrayResult<Self> {
        let len: usize = shape.iter().product();
        if len != data.len() {
            return Err(ArrayError::ShapeMismatch {
                shape,
                len: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    /// One-dimensional array
    pub fn from_vec(data: Vec<f64>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    /// Two-dimensional array from equal-length rows
    pub fn from_rows<const N: usize>(rows: &[[f64; N]]) -> Self {
        Self {
            shape: vec![rows.len(), N],
            data: rows.iter().flatten().copied().collect(),
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn into_data(self) -> Vec<f64> {
        self.data
    }

    /// Serialize to `.npy` bytes.
    ///
    /// Version 1.0 is used unless the header outgrows its 16-bit length field,
    /// in which case the file is written as version 2.0.
    pub fn to_npy(&self) -> Bytes {
        let dict = format!(
            "{{'descr': '<f8', 'fortran_order': False, 'shape': {}, }}",
            shape_literal(&self.shape)
        );

        // magic(6) + version(2) + header_len(2 or 4) + header + '\n'
        let v1_header = aligned_header(&dict, 10);
        let (major, prefix, header) = match u16::try_from(v1_header.len()) {
            Ok(_) => (1, 10, v1_header),
            Err(_) => (2, 12, aligned_header(&dict, 12)),
        };

        let mut buf = BytesMut::with_capacity(prefix + header.len() + self.data.len() * 8);
        buf.put_slice(NPY_MAGIC);
        buf.put_u8(major);
        buf.put_u8(0);
        if major == 1 {
            buf.put_u16_le(header.len() as u16);
        } else {
            buf.put_u32_le(header.len() as u32);
        }
        buf.put_slice(header.as_bytes());
        for value in &self.data {
            buf.put_f64_le(*value);
        }
        buf.freeze()
    }

    /// Parse `.npy` bytes
    pub fn from_npy(bytes: &[u8]) -> ArrayResult<Self> {
        let mut src = bytes;
        if src.len() < 10 || &src[..6] != NPY_MAGIC {
            return Err(ArrayError::BadMagic);
        }
        src.advance(6);
        let (major, minor) = (src.get_u8(), src.get_u8());
        let header_len = match major {
            1 => src.get_u16_le() as usize,
            2 | 3 => {
                if src.len() < 4 {
                    return Err(ArrayError::MalformedHeader("truncated length".to_string()));
                }
                src.get_u32_le() as usize
            }
            _ => return Err(ArrayError::UnsupportedVersion(major, minor)),
        };
        if src.len() < header_len {
            return Err(ArrayError::MalformedHeader("truncated header".to_string()));
        }
        let header = std::str::from_utf8(&src[..header_len])
            .map_err(|_| ArrayError::MalformedHeader("header is not text".to_string()))?;
        let header = parse_header(header)?;
        src.advance(header_len);

        if header.fortran_order {
            return Err(ArrayError::FortranOrder);
        }

        let len = header
            .shape
            .iter()
            .try_fold(1usize, |acc, dim| acc.checked_mul(*dim))
            .ok_or_else(|| ArrayError::MalformedHeader("shape overflows".to_string()))?;
        let expected = len
            .checked_mul(header.dtype.size())
            .ok_or_else(|| ArrayError::MalformedHeader("shape overflows".to_string()))?;
        if src.len() != expected {
            return Err(ArrayError::SizeMismatch {
                expected,
                actual: src.len(),
            });
        }

        let data = (0..len).map(|_| header.dtype.read(&mut src)).collect();
        Ok(Self {
            shape: header.shape,
            data,
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Dtype {
    F8,
    F4,
    I8,
    I4,
}

impl Dtype {
    fn parse(descr: &str) -> ArrayResult<Self> {
        match descr {
            "<f8" => Ok(Dtype::F8),
            "<f4" => Ok(Dtype::F4),
            "<i8" => Ok(Dtype::I8),
            "<i4" => Ok(Dtype::I4),
            other => Err(ArrayError::UnsupportedDtype(other.to_string())),
        }
    }

    fn size(self) -> usize {
        match self {
            Dtype::F8 | Dtype::I8 => 8,
            Dtype::F4 | Dtype::I4 => 4,
        }
    }

    fn read(self, src: &mut &[u8]) -> f64 {
        match self {
            Dtype::F8 => src.get_f64_le(),
            Dtype::F4 => f64::from(src.get_f32_le()),
            Dtype::I8 => src.get_i64_le() as f64,
            Dtype::I4 => f64::from(src.get_i32_le()),
        }
    }
}

struct Header {
    dtype: Dtype,
    fortran_order: bool,
    shape: Vec<usize>,
}

/// Parse the Python dict literal in an NPY header, e.g.
/// `{'descr': '<f8', 'fortran_order': False, 'shape': (3, 2), }`
fn parse_header(text: &str) -> ArrayResult<Header> {
    let malformed = |what: &str| ArrayError::MalformedHeader(what.to_string());

    let descr = dict_entry(text, "descr").ok_or_else(|| malformed("missing descr"))?;
    let descr = descr
        .trim_start_matches(['\'', '"'])
        .split(['\'', '"'])
        .next()
        .ok_or_else(|| malformed("bad descr"))?;
    // '|' marks single-byte types, '=' native order; treat native as little-endian
    let descr = descr.replacen('=', "<", 1);

    let fortran = dict_entry(text, "fortran_order").ok_or_else(|| malformed("missing fortran_order"))?;
    let fortran_order = fortran.starts_with("True");

    let shape = dict_entry(text, "shape").ok_or_else(|| malformed("missing shape"))?;
    let open = shape.find('(').ok_or_else(|| malformed("bad shape"))?;
    let close = shape.find(')').ok_or_else(|| malformed("bad shape"))?;
    let shape = shape[open + 1..close]
        .split(',')
        .map(str::trim)
        .filter(|dim| !dim.is_empty())
        .map(|dim| dim.parse::<usize>().map_err(|_| malformed("bad shape dimension")))
        .collect::<ArrayResult<Vec<_>>>()?;

    Ok(Header {
        dtype: Dtype::parse(&descr)?,
        fortran_order,
        shape,
    })
}

/// Text following `'key':` in the header dict
fn dict_entry<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    let quoted = format!("'{}'", key);
    let start = text.find(&quoted)? + quoted.len();
    let rest = text[start..].trim_start().strip_prefix(':')?;
    Some(rest.trim_start())
}

/// Header dict padded with spaces and a newline so the data starts on an
/// `NPY_ALIGN` boundary after a `prefix`-byte preamble
fn aligned_header(dict: &str, prefix: usize) -> String {
    let unpadded = prefix + dict.len() + 1;
    let pad = (NPY_ALIGN - unpadded % NPY_ALIGN) % NPY_ALIGN;
    let mut header = String::with_capacity(dict.len() + pad + 1);
    header.push_str(dict);
    header.extend(std::iter::repeat(' ').take(pad));
    header.push('\n');
    header
}

fn shape_literal(shape: &[usize]) -> String {
    match shape {
        [] => "()".to_string(),
        [n] => format!("({},)", n),
        dims => format!(
            "({})",
            dims.iter().map(usize::to_string).collect::<Vec<_>>().join(", ")
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_npy_layout() {
        let array = NumericArray::from_vec(vec![1.0, 2.0, 3.0]);
        let bytes = array.to_npy();

        assert_eq!(&bytes[..6], NPY_MAGIC);
        assert_eq!(bytes[6], 1);
        let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        assert_eq!((10 + header_len) % NPY_ALIGN, 0);

        let header = std::str::from_utf8(&bytes[10..10 + header_len]).unwrap();
        assert!(header.starts_with("{'descr': '<f8', 'fortran_order': False, 'shape': (3,), }"));
        assert!(header.ends_with('\n'));
        assert_eq!(bytes.len(), 10 + header_len + 24);
    }

    #[test]
    fn test_npy_two_dimensional() {
        let array = NumericArray::from_rows(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
        assert_eq!(array.shape(), &[2, 3]);

        let restored = NumericArray::from_npy(&array.to_npy()).unwrap();
        assert_eq!(restored, array);
    }

    #[test]
    fn test_npy_integer_payload() {
        // numpy.save of np.array([1, 2, 3]) on a 64-bit platform
        let header = "{'descr': '<i8', 'fortran_order': False, 'shape': (3,), }";
        let mut bytes = Vec::new();
        bytes.extend_from_slice(NPY_MAGIC);
        bytes.extend_from_slice(&[1, 0]);
        bytes.extend_from_slice(&(header.len() as u16 + 1).to_le_bytes());
        bytes.extend_from_slice(header.as_bytes());
        bytes.push(b'\n');
        for v in [1i64, 2, 3] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }

        let array = NumericArray::from_npy(&bytes).unwrap();
        assert_eq!(array.shape(), &[3]);
        assert_eq!(array.data(), &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_npy_rejects_garbage() {
        assert_eq!(NumericArray::from_npy(b"not an array"), Err(ArrayError::BadMagic));

        let mut bytes = NumericArray::from_vec(vec![1.0]).to_npy().to_vec();
        bytes.pop();
        assert!(matches!(
            NumericArray::from_npy(&bytes),
            Err(ArrayError::SizeMismatch { expected: 8, actual: 7 })
        ));
    }

    fn npy_with_header(header: &str, payload: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(NPY_MAGIC);
        bytes.extend_from_slice(&[1, 0]);
        bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
        bytes.extend_from_slice(header.as_bytes());
        bytes.extend_from_slice(payload);
        bytes
    }

    #[test]
    fn test_npy_overflowing_shape() {
        let header = "{'descr': '<f8', 'fortran_order': False, 'shape': (18446744073709551615, 2), }\n";
        assert!(matches!(
            NumericArray::from_npy(&npy_with_header(header, &[])),
            Err(ArrayError::MalformedHeader(_))
        ));

        // element count fits but the byte count does not
        let header = "{'descr': '<f8', 'fortran_order': False, 'shape': (2305843009213693952,), }\n";
        assert!(matches!(
            NumericArray::from_npy(&npy_with_header(header, &[])),
            Err(ArrayError::MalformedHeader(_))
        ));
    }

    #[test]
    fn test_npy_long_header_uses_version_two() {
        let shape = vec![1; 30_000];
        let array = NumericArray::new(shape.clone(), vec![7.5]).unwrap();
        let bytes = array.to_npy();

        assert_eq!(bytes[6], 2);
        let header_len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
        assert_eq!((12 + header_len) % NPY_ALIGN, 0);

        let restored = NumericArray::from_npy(&bytes).unwrap();
        assert_eq!(restored.shape(), shape.as_slice());
        assert_eq!(restored.data(), &[7.5]);
    }

    #[test]
    fn test_shape_mismatch() {
        assert!(NumericArray::new(vec![2, 2], vec![1.0, 2.0, 3.0]).is_err());
        assert!(NumericArray::new(vec![], vec![4.0]).is_ok());
    }
}
