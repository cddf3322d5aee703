use log::info;
use ndarray::{Array1, Array2, ArrayView1, Ix1, Ix2, OwnedRepr};
use ndarray_npy::{NpzReader, ReadNpzError};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek};
use std::path::Path;

use crate::labels::RawLabel;
use crate::{ClassifierError, Result};

const FEATURES_KEY: &str = "X_test";
const LABELS_KEY: &str = "y_test";
const NPY_MAGIC: &[u8] = b"\x93NUMPY";

/// Held-out samples and their ground-truth labels, row-aligned.
#[derive(Debug, Clone)]
pub struct TestSet {
    features: Array2<f32>,
    labels: Vec<RawLabel>,
}

fn dataset_error<E: std::fmt::Display>(err: E) -> ClassifierError {
    ClassifierError::Dataset(err.to_string())
}

impl TestSet {
    pub fn new(features: Array2<f32>, labels: Vec<RawLabel>) -> Result<Self> {
        if features.nrows() != labels.len() {
            return Err(ClassifierError::Dataset(format!(
                "{} has {} rows but {} has {} labels",
                FEATURES_KEY,
                features.nrows(),
                LABELS_KEY,
                labels.len()
            )));
        }
        Ok(Self { features, labels })
    }

    /// Loads `X_test` and `y_test` from an `.npz` archive. Features may be
    /// stored as f32 or f64. Labels may be integers, floats, byte strings
    /// (`|S`) or unicode strings (`<U`).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ClassifierError::MissingArtifact {
                kind: "dataset",
                path: path.to_path_buf(),
            });
        }

        let file = File::open(path).map_err(dataset_error)?;
        let mut npz = NpzReader::new(file).map_err(dataset_error)?;
        let features_name = entry_name(&mut npz, FEATURES_KEY)?;
        let labels_name = entry_name(&mut npz, LABELS_KEY)?;

        let features = read_features(&mut npz, &features_name)?;
        let labels = match read_labels(&mut npz, &labels_name) {
            Ok(labels) => labels,
            Err(numeric_err) => read_text_labels(path, &labels_name).map_err(|text_err| {
                ClassifierError::Dataset(format!(
                    "{} must be a 1-D numeric or string array ({}; {})",
                    labels_name, numeric_err, text_err
                ))
            })?,
        };
        let test_set = Self::new(features, labels)?;

        info!(
            "Loaded test set from {}: {} samples x {} features",
            path.display(),
            test_set.len(),
            test_set.n_features()
        );
        Ok(test_set)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn n_features(&self) -> usize {
        self.features.ncols()
    }

    pub fn sample(&self, index: usize) -> Result<(ArrayView1<'_, f32>, &RawLabel)> {
        let label = self.labels.get(index).ok_or(ClassifierError::IndexOutOfRange {
            index,
            len: self.len(),
        })?;
        Ok((self.features.row(index), label))
    }
}

/// NumPy stores `key` as `key.npy`; accept either form.
fn entry_name<R: Read + Seek>(npz: &mut NpzReader<R>, key: &str) -> Result<String> {
    let names = npz.names().map_err(dataset_error)?;
    let with_ext = format!("{}.npy", key);
    names
        .into_iter()
        .find(|name| name == key || *name == with_ext)
        .ok_or_else(|| ClassifierError::Dataset(format!("archive has no '{}' array", key)))
}

fn read_features<R: Read + Seek>(npz: &mut NpzReader<R>, name: &str) -> Result<Array2<f32>> {
    if let Ok(array) = npz.by_name::<OwnedRepr<f32>, Ix2>(name) {
        return Ok(array);
    }
    let array: Array2<f64> = npz.by_name(name).map_err(|e: ReadNpzError| {
        ClassifierError::Dataset(format!("{} must be a 2-D float array: {}", name, e))
    })?;
    Ok(array.mapv(|x| x as f32))
}

fn read_labels<R: Read + Seek>(npz: &mut NpzReader<R>, name: &str) -> Result<Vec<RawLabel>> {
    if let Ok(array) = npz.by_name::<OwnedRepr<i64>, Ix1>(name) {
        return Ok(array.into_iter().map(RawLabel::Int).collect());
    }
    if let Ok(array) = npz.by_name::<OwnedRepr<i32>, Ix1>(name) {
        return Ok(array.into_iter().map(|v| RawLabel::Int(v.into())).collect());
    }
    if let Ok(array) = npz.by_name::<OwnedRepr<u8>, Ix1>(name) {
        return Ok(array.into_iter().map(|v| RawLabel::Int(v.into())).collect());
    }
    let array: Array1<f64> = npz.by_name(name).map_err(dataset_error)?;
    Ok(array.into_iter().map(RawLabel::Float).collect())
}

/// Element type of a string label array.
#[derive(Debug, Clone, Copy, PartialEq)]
enum TextDtype {
    /// `|S<n>`: NUL-padded bytes.
    Bytes(usize),
    /// `<U<n>` or `>U<n>`: NUL-padded UTF-32 code points.
    Unicode { width: usize, big_endian: bool },
}

impl TextDtype {
    fn parse(descr: &str) -> Result<Self> {
        let (order, kind) = match descr.chars().next() {
            Some(c @ ('<' | '>' | '|' | '=')) => (Some(c), &descr[1..]),
            _ => (None, descr),
        };
        let width = |digits: &str| -> Result<usize> {
            digits
                .parse::<usize>()
                .ok()
                .filter(|&n| n > 0)
                .ok_or_else(|| ClassifierError::Dataset(format!("bad string width in {}", descr)))
        };
        let mut chars = kind.chars();
        match (chars.next(), chars.as_str()) {
            (Some('S' | 'a'), digits) => Ok(TextDtype::Bytes(width(digits)?)),
            (Some('U'), digits) => Ok(TextDtype::Unicode {
                width: width(digits)?,
                big_endian: order == Some('>'),
            }),
            (Some('O'), _) => Err(ClassifierError::Dataset(
                "pickled object arrays are not supported".into(),
            )),
            _ => Err(ClassifierError::Dataset(format!(
                "unsupported label dtype {}",
                descr
            ))),
        }
    }

    fn item_size(&self) -> usize {
        match self {
            TextDtype::Bytes(width) => *width,
            TextDtype::Unicode { width, .. } => width * 4,
        }
    }

    fn decode(&self, item: &[u8]) -> Result<RawLabel> {
        match self {
            TextDtype::Bytes(_) => {
                let end = item.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
                Ok(RawLabel::Bytes(item[..end].to_vec()))
            }
            TextDtype::Unicode { big_endian, .. } => {
                let mut text = String::new();
                for unit in item.chunks_exact(4) {
                    let bytes = [unit[0], unit[1], unit[2], unit[3]];
                    let code = if *big_endian {
                        u32::from_be_bytes(bytes)
                    } else {
                        u32::from_le_bytes(bytes)
                    };
                    if code == 0 {
                        break;
                    }
                    let c = char::from_u32(code).ok_or_else(|| {
                        ClassifierError::Dataset(format!("invalid code point {:#x}", code))
                    })?;
                    text.push(c);
                }
                Ok(RawLabel::Text(text))
            }
        }
    }
}

/// The parts of an `.npy` header needed to read a 1-D string array.
#[derive(Debug, PartialEq)]
struct NpyHeader {
    descr: String,
    shape: Vec<usize>,
}

fn read_npy_header<R: Read>(reader: &mut R) -> Result<String> {
    let mut magic = [0u8; 6];
    reader.read_exact(&mut magic).map_err(dataset_error)?;
    if magic != NPY_MAGIC {
        return Err(ClassifierError::Dataset("npy magic string mismatch".into()));
    }
    let mut version = [0u8; 2];
    reader.read_exact(&mut version).map_err(dataset_error)?;
    let len_bytes = match version[0] {
        1 => 2,
        2 | 3 => 4,
        other => {
            return Err(ClassifierError::Dataset(format!(
                "unsupported npy version {}",
                other
            )))
        }
    };
    let mut header_len = vec![0u8; len_bytes];
    reader.read_exact(&mut header_len).map_err(dataset_error)?;
    let header_len = header_len
        .iter()
        .rev()
        .fold(0usize, |acc, &b| 256 * acc + b as usize);
    let mut header = vec![0u8; header_len];
    reader.read_exact(&mut header).map_err(dataset_error)?;
    Ok(String::from_utf8_lossy(&header).into_owned())
}

impl NpyHeader {
    // e.g. {'descr': '|S3', 'fortran_order': False, 'shape': (2,), }
    fn parse(header: &str) -> Result<Self> {
        let header =
            header.trim_matches(|c: char| c == '{' || c == '}' || c == ',' || c.is_whitespace());

        let mut parts = Vec::new();
        let mut start = 0;
        let mut depth = 0i32;
        for (index, c) in header.char_indices() {
            match c {
                '(' => depth += 1,
                ')' => depth -= 1,
                ',' if depth == 0 => {
                    parts.push(&header[start..index]);
                    start = index + 1;
                }
                _ => {}
            }
        }
        parts.push(&header[start..]);

        let mut fields = HashMap::new();
        for part in parts.iter().map(|p| p.trim()).filter(|p| !p.is_empty()) {
            let (key, value) = part.split_once(':').ok_or_else(|| {
                ClassifierError::Dataset(format!("unable to parse npy header {}", header))
            })?;
            let unquote = |s: &str| s.trim_matches(|c: char| c == '\'' || c.is_whitespace()).to_string();
            fields.insert(unquote(key), unquote(value));
        }

        let descr = fields
            .remove("descr")
            .filter(|d| !d.is_empty())
            .ok_or_else(|| ClassifierError::Dataset("npy header has no descr".into()))?;
        let shape = fields
            .get("shape")
            .ok_or_else(|| ClassifierError::Dataset("npy header has no shape".into()))?
            .trim_matches(|c: char| c == '(' || c == ')' || c == ',')
            .split(',')
            .map(str::trim)
            .filter(|dim| !dim.is_empty())
            .map(|dim| dim.parse::<usize>().map_err(dataset_error))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { descr, shape })
    }
}

fn parse_text_npy(bytes: &[u8]) -> Result<Vec<RawLabel>> {
    let mut reader = Cursor::new(bytes);
    let header = NpyHeader::parse(&read_npy_header(&mut reader)?)?;
    let dtype = TextDtype::parse(&header.descr)?;

    let count = match header.shape.as_slice() {
        [n] => *n,
        shape => {
            return Err(ClassifierError::Dataset(format!(
                "labels must be 1-D, got shape {:?}",
                shape
            )))
        }
    };
    let body = &bytes[reader.position() as usize..];
    let item_size = dtype.item_size();
    if body.len() < count * item_size {
        return Err(ClassifierError::Dataset(format!(
            "label array truncated: {} bytes for {} items of {}",
            body.len(),
            count,
            item_size
        )));
    }

    body.chunks_exact(item_size)
        .take(count)
        .map(|item| dtype.decode(item))
        .collect()
}

/// String label arrays are outside what the numeric npz reader handles, so
/// the entry is read straight from the zip archive.
fn read_text_labels(path: &Path, name: &str) -> Result<Vec<RawLabel>> {
    let file = File::open(path).map_err(dataset_error)?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file)).map_err(dataset_error)?;
    let mut entry = archive.by_name(name).map_err(dataset_error)?;
    let mut bytes = Vec::new();
    entry.read_to_end(&mut bytes).map_err(dataset_error)?;
    parse_text_npy(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use ndarray_npy::NpzWriter;

    fn write_npz<F, L>(path: &Path, features: &Array2<F>, labels: &Array1<L>)
    where
        F: ndarray_npy::WritableElement,
        L: ndarray_npy::WritableElement,
    {
        let mut npz = NpzWriter::new(File::create(path).unwrap());
        npz.add_array("X_test", features).unwrap();
        npz.add_array("y_test", labels).unwrap();
        npz.finish().unwrap();
    }

    #[test]
    fn test_load_f64_features_and_int_labels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data_processed.npz");
        write_npz(&path, &array![[0.5f64, 1.0, -1.0], [0.0, 0.25, 2.0]], &array![0i64, 1]);

        let test_set = TestSet::load(&path).unwrap();
        assert_eq!(test_set.len(), 2);
        assert_eq!(test_set.n_features(), 3);

        let (row, label) = test_set.sample(1).unwrap();
        assert_eq!(row.to_vec(), vec![0.0, 0.25, 2.0]);
        assert_eq!(label, &RawLabel::Int(1));
    }

    #[test]
    fn test_load_f32_features_and_float_labels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.npz");
        write_npz(&path, &array![[1.0f32, 2.0]], &array![1.0f64]);

        let test_set = TestSet::load(&path).unwrap();
        assert_eq!(test_set.sample(0).unwrap().1, &RawLabel::Float(1.0));
    }

    /// Version 1.0 `.npy` bytes with the given header fields and raw body.
    fn npy_bytes(descr: &str, shape: &str, body: &[u8]) -> Vec<u8> {
        let mut header = format!(
            "{{'descr': '{}', 'fortran_order': False, 'shape': {}, }}",
            descr, shape
        );
        while (NPY_MAGIC.len() + 4 + header.len() + 1) % 64 != 0 {
            header.push(' ');
        }
        header.push('\n');

        let mut bytes = NPY_MAGIC.to_vec();
        bytes.extend_from_slice(&[1, 0]);
        bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
        bytes.extend_from_slice(header.as_bytes());
        bytes.extend_from_slice(body);
        bytes
    }

    fn utf32(words: &[&str], width: usize) -> Vec<u8> {
        let mut body = Vec::new();
        for word in words {
            let mut units: Vec<u32> = word.chars().map(u32::from).collect();
            units.resize(width, 0);
            for unit in units {
                body.extend_from_slice(&unit.to_le_bytes());
            }
        }
        body
    }

    #[test]
    fn test_header_parse() {
        let header =
            NpyHeader::parse("{'descr': '<U5', 'fortran_order': False, 'shape': (12,), }  ")
                .unwrap();
        assert_eq!(header.descr, "<U5");
        assert_eq!(header.shape, vec![12]);
    }

    #[test]
    fn test_byte_string_labels_drop_padding() {
        let bytes = npy_bytes("|S3", "(3,)", b"catdo\0dog");
        assert_eq!(
            parse_text_npy(&bytes).unwrap(),
            vec![
                RawLabel::Bytes(b"cat".to_vec()),
                RawLabel::Bytes(b"do".to_vec()),
                RawLabel::Bytes(b"dog".to_vec()),
            ]
        );
    }

    #[test]
    fn test_unicode_labels() {
        let bytes = npy_bytes("<U6", "(2,)", &utf32(&["kucing", "anjing"], 6));
        assert_eq!(
            parse_text_npy(&bytes).unwrap(),
            vec![RawLabel::from("kucing"), RawLabel::from("anjing")]
        );
    }

    #[test]
    fn test_object_and_truncated_arrays_rejected() {
        let object = npy_bytes("|O", "(2,)", &[0u8; 16]);
        assert!(matches!(parse_text_npy(&object), Err(ClassifierError::Dataset(_))));

        let truncated = npy_bytes("|S4", "(3,)", b"cat\0dog");
        assert!(parse_text_npy(&truncated).is_err());

        let matrix = npy_bytes("|S3", "(1, 2)", b"catdog");
        assert!(parse_text_npy(&matrix).is_err());

        assert!(parse_text_npy(b"not an npy file").is_err());
    }

    #[test]
    fn test_load_archive_with_string_labels() {
        use ndarray_npy::WriteNpyExt;
        use std::io::Write;
        use zip::write::SimpleFileOptions;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data_processed.npz");
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);

        let mut zip = zip::ZipWriter::new(File::create(&path).unwrap());
        zip.start_file("X_test.npy", options).unwrap();
        array![[0.1f32, 0.2], [0.3, 0.4]].write_npy(&mut zip).unwrap();
        zip.start_file("y_test.npy", options).unwrap();
        zip.write_all(&npy_bytes("<U3", "(2,)", &utf32(&["dog", "cat"], 3)))
            .unwrap();
        zip.finish().unwrap();

        let test_set = TestSet::load(&path).unwrap();
        assert_eq!(test_set.len(), 2);
        assert_eq!(test_set.sample(0).unwrap().1, &RawLabel::from("dog"));
        assert_eq!(test_set.sample(1).unwrap().1, &RawLabel::from("cat"));
    }

    #[test]
    fn test_out_of_range_index() {
        let test_set = TestSet::new(Array2::zeros((2, 4)), vec![RawLabel::Int(0); 2]).unwrap();
        assert!(matches!(
            test_set.sample(2),
            Err(ClassifierError::IndexOutOfRange { index: 2, len: 2 })
        ));
    }

    #[test]
    fn test_row_count_mismatch() {
        let result = TestSet::new(Array2::zeros((3, 4)), vec![RawLabel::Int(0); 2]);
        assert!(matches!(result, Err(ClassifierError::Dataset(_))));
    }

    #[test]
    fn test_missing_archive() {
        let dir = tempfile::tempdir().unwrap();
        let result = TestSet::load(dir.path().join("nope.npz"));
        assert!(matches!(
            result,
            Err(ClassifierError::MissingArtifact { kind: "dataset", .. })
        ));
    }
}
