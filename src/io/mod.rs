//! Serialisation of back-transformation inputs and outputs.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use anyhow::{self, format_err, Context};
use bincode;
use serde::{de::DeserializeOwned, Serialize};
use serde_yaml;

use crate::storage::descriptor::{BlockDescriptor, TpdmBuffer};
use crate::storage::disk::{DiskBackend, DiskBlockStore};

pub(crate) mod format;
pub mod numeric;


/// An enumerated type for back-transformation file types.
pub enum TpdmFileType {
    /// Variant for binary files containing the block descriptor of a persisted density.
    Dsc,

    /// Variant for binary files containing back-transformation parameters.
    Par,
}

impl TpdmFileType {
    /// Returns the extension of the file type.
    pub fn ext(&self) -> String {
        match self {
            TpdmFileType::Dsc => "tpdm.dsc".to_string(),
            TpdmFileType::Par => "tpdm.par".to_string(),
        }
    }
}

/// Appends the extension of a file type to a name that may itself contain dots.
fn with_file_type<P: AsRef<Path>>(name: P, file_type: &TpdmFileType) -> PathBuf {
    let mut path = name.as_ref().as_os_str().to_owned();
    path.push(".");
    path.push(file_type.ext());
    PathBuf::from(path)
}

/// Reads a binary file and deserialises it into an appropriate structure.
///
/// # Arguments
///
/// * `name` - The name of the file to be read in (without its type-specific extension).
/// * `file_type` - The type of the file to be read in.
pub fn read_tpdm_binary<T, P: AsRef<Path>>(
    name: P,
    file_type: TpdmFileType,
) -> Result<T, anyhow::Error>
where
    T: DeserializeOwned,
{
    let path = with_file_type(name, &file_type);
    let mut reader = BufReader::new(
        File::open(&path).with_context(|| format!("Unable to open `{}`", path.display()))?,
    );
    bincode::deserialize_from(&mut reader).map_err(|err| format_err!(err))
}

/// Serialises a structure and writes it into a binary file.
///
/// # Arguments
///
/// * `name` - The name of the file to be written (without its type-specific extension).
/// * `file_type` - The type of the file to be written.
/// * `value` - The structure to be serialised.
pub fn write_tpdm_binary<T, P: AsRef<Path>>(
    name: P,
    file_type: TpdmFileType,
    value: &T,
) -> Result<(), anyhow::Error>
where
    T: Serialize,
{
    let path = with_file_type(name, &file_type);
    let mut writer = BufWriter::new(
        File::create(&path).with_context(|| format!("Unable to create `{}`", path.display()))?,
    );
    bincode::serialize_into(&mut writer, value).map_err(|err| format_err!(err))
}

/// Reads a YAML configuration file and deserialises it into an appropriate structure.
///
/// # Arguments
///
/// * `name` - The name of the file to be read in (with its `.yml` or `.yaml` extension).
pub fn read_tpdm_yaml<T, P: AsRef<Path>>(name: P) -> Result<T, anyhow::Error>
where
    T: DeserializeOwned,
{
    let mut reader = BufReader::new(File::open(name).map_err(|err| format_err!(err))?);
    serde_yaml::from_reader(&mut reader).map_err(|err| format_err!(err))
}

/// Serialises a structure and writes it into a YAML configuration file.
///
/// # Arguments
///
/// * `name` - The name of the YAML file to be written (without extensions). The resulting file
/// will have the `.yml` extension.
pub fn write_tpdm_yaml<T, P: AsRef<Path>>(name: P, value: &T) -> Result<(), anyhow::Error>
where
    T: Serialize,
{
    let mut path = name.as_ref().to_path_buf();
    path.set_extension("yml");
    let mut writer = BufWriter::new(File::create(path)?);
    serde_yaml::to_writer(&mut writer, value).map_err(|err| format_err!(err))
}

/// Writes the descriptor of a persisted density next to its block file, so that the density can
/// be reopened with [`open_tpdm_output`].
pub fn write_tpdm_descriptor(
    backend: &DiskBackend,
    buffer: &TpdmBuffer<DiskBlockStore>,
) -> Result<(), anyhow::Error> {
    let descriptor = buffer.descriptor();
    write_tpdm_binary(
        backend.directory().join(descriptor.label()),
        TpdmFileType::Dsc,
        descriptor,
    )
}

/// Reopens a persisted density from its block file and descriptor.
///
/// # Arguments
///
/// * `directory` - The directory holding the density.
/// * `label` - The label of the density.
pub fn open_tpdm_output<P: AsRef<Path>>(
    directory: P,
    label: &str,
) -> Result<TpdmBuffer<DiskBlockStore>, anyhow::Error> {
    let backend = DiskBackend::new(directory.as_ref())?;
    let descriptor: BlockDescriptor =
        read_tpdm_binary(backend.directory().join(label), TpdmFileType::Dsc)
            .with_context(|| format!("Unable to read the descriptor of density `{label}`"))?;
    let store = backend.open_store(label, &descriptor.shapes()?)?;
    Ok(TpdmBuffer::new(descriptor, store)?)
}
