use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::info;

use crate::codec::IdCodec;
use crate::embedding::EmbeddingMatrix;
use crate::error::{EntityKind, RecError, Result};

const MATRIX_MAGIC: &[u8; 4] = b"AEMB";
const HEADER_LEN: usize = 12;

/// File layout of a trained artifact directory.
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    root: PathBuf,
}

impl ArtifactPaths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn codec(&self, kind: EntityKind) -> PathBuf {
        self.root.join(format!("{}_codec.json", kind.as_str()))
    }

    pub fn weights(&self, kind: EntityKind) -> PathBuf {
        self.root.join(format!("{}_weights.bin", kind.as_str()))
    }

    pub fn ratings(&self) -> PathBuf {
        self.root.join("ratings.csv")
    }

    pub fn items(&self) -> PathBuf {
        self.root.join("items.csv")
    }

    pub fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        Ok(())
    }
}

pub fn save_codec(path: &Path, codec: &IdCodec<i64>) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(&mut writer, codec.ids())?;
    writer.flush()?;
    info!(path = %path.display(), entries = codec.len(), kind = %codec.kind(), "saved codec");
    Ok(())
}

pub fn load_codec(path: &Path, kind: EntityKind) -> Result<IdCodec<i64>> {
    let reader = BufReader::new(File::open(path)?);
    let ids: Vec<i64> = serde_json::from_reader(reader)?;
    IdCodec::from_unique(kind, ids)
}

pub fn write_matrix<W: Write>(mut writer: W, matrix: &EmbeddingMatrix) -> Result<()> {
    let rows = u32::try_from(matrix.rows())
        .map_err(|_| RecError::InvalidArtifact("matrix has too many rows".to_string()))?;
    let dims = u32::try_from(matrix.dims())
        .map_err(|_| RecError::InvalidArtifact("matrix is too wide".to_string()))?;
    writer.write_all(MATRIX_MAGIC)?;
    writer.write_all(&rows.to_le_bytes())?;
    writer.write_all(&dims.to_le_bytes())?;
    for value in matrix.as_slice() {
        writer.write_all(&value.to_le_bytes())?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_matrix<R: Read>(mut reader: R) -> Result<EmbeddingMatrix> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    decode_matrix(&bytes)
}

fn decode_matrix(bytes: &[u8]) -> Result<EmbeddingMatrix> {
    if bytes.len() < HEADER_LEN || &bytes[..4] != MATRIX_MAGIC {
        return Err(RecError::InvalidArtifact(
            "missing embedding matrix header".to_string(),
        ));
    }
    let rows = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    let dims = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
    let body = &bytes[HEADER_LEN..];
    let expected = rows
        .checked_mul(dims)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| RecError::InvalidArtifact("matrix shape overflows".to_string()))?;
    if body.len() != expected {
        return Err(RecError::InvalidArtifact(format!(
            "matrix {rows}x{dims} needs {expected} bytes, found {}",
            body.len()
        )));
    }
    let mut data: Vec<f32> = bytemuck::pod_collect_to_vec(body);
    if cfg!(target_endian = "big") {
        for value in data.iter_mut() {
            *value = f32::from_bits(value.to_bits().swap_bytes());
        }
    }
    EmbeddingMatrix::from_flat(rows, dims, data)
}

pub fn save_matrix(path: &Path, matrix: &EmbeddingMatrix) -> Result<()> {
    write_matrix(BufWriter::new(File::create(path)?), matrix)?;
    info!(
        path = %path.display(),
        rows = matrix.rows(),
        dims = matrix.dims(),
        "saved embedding matrix"
    );
    Ok(())
}

pub fn load_matrix(path: &Path) -> Result<EmbeddingMatrix> {
    let bytes = fs::read(path)?;
    decode_matrix(&bytes)
}
