//! Reading and writing the registration file.

use crate::error::Result;
use crate::types::{Registrations, UsersFile};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Load the mapping stored at `path`.
///
/// Unlike opening a store, this reports every failure: missing file, empty
/// file, malformed JSON and a missing `users` envelope are all errors.
pub fn read_registrations(path: impl AsRef<Path>) -> Result<Registrations> {
    let data = fs::read(path.as_ref())?;
    decode(&data)
}

/// Read whatever the handle holds from the start and decode it.
pub(crate) fn read_from(file: &mut File) -> Result<Registrations> {
    let mut data = Vec::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut data)?;
    decode(&data)
}

fn decode(data: &[u8]) -> Result<Registrations> {
    let envelope: UsersFile = serde_json::from_slice(data)?;
    Ok(envelope.users)
}

/// Replace the file contents with the envelope for `users`.
///
/// Returns the number of bytes written.
pub(crate) fn overwrite(
    file: &mut File,
    users: &Registrations,
    pretty: bool,
    sync: bool,
) -> Result<usize> {
    let bytes = encode(users, pretty)?;

    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&bytes)?;
    file.flush()?;
    if sync {
        file.sync_data()?;
    }

    Ok(bytes.len())
}

fn encode(users: &Registrations, pretty: bool) -> Result<Vec<u8>> {
    #[derive(Serialize)]
    struct Envelope<'a> {
        users: &'a Registrations,
    }

    let envelope = Envelope { users };
    let bytes = if pretty {
        serde_json::to_vec_pretty(&envelope)?
    } else {
        serde_json::to_vec(&envelope)?
    };
    Ok(bytes)
}
