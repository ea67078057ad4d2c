// 👥 Participants - bulk upload and search
//
// Bulk text is one "code,full name" per line. A batch is all-or-nothing:
// any duplicate inside the batch, or any code already stored, rejects it.

use anyhow::Result;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

use crate::db::{self, Participant};

/// Sample shown to users preparing a bulk upload
pub const BULK_TEMPLATE: &str = "P001,Juan Pérez\nP002,María García\nP003,Carlos López";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParticipantError {
    #[error("No hay datos válidos para cargar")]
    Empty,

    #[error("Códigos duplicados encontrados: {}", .0.join(", "))]
    DuplicateCodes(Vec<String>),

    #[error("Los siguientes códigos ya existen: {}", .0.join(", "))]
    ExistingCodes(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewParticipant {
    pub code: String,
    pub full_name: String,
}

impl NewParticipant {
    pub fn into_participant(self) -> Participant {
        Participant::new(&self.code, &self.full_name)
    }
}

/// Parse "code,name" lines. Lines without both fields are skipped.
///
/// Only the first comma splits: "P004,Pérez, Ana" keeps "Pérez, Ana" as the name.
pub fn parse_bulk_text(text: &str) -> Vec<NewParticipant> {
    text.lines()
        .filter_map(|line| {
            let (code, name) = line.split_once(',')?;
            let code = code.trim();
            let name = name.trim();
            if code.is_empty() || name.is_empty() {
                return None;
            }
            Some(NewParticipant {
                code: code.to_string(),
                full_name: name.to_string(),
            })
        })
        .collect()
}

/// Check a parsed batch against itself and the codes already stored
pub fn validate_bulk(
    batch: &[NewParticipant],
    existing_codes: &[String],
) -> Result<(), ParticipantError> {
    if batch.is_empty() {
        return Err(ParticipantError::Empty);
    }

    let mut seen = BTreeSet::new();
    let mut duplicates = BTreeSet::new();
    for entry in batch {
        if !seen.insert(entry.code.as_str()) {
            duplicates.insert(entry.code.clone());
        }
    }
    if !duplicates.is_empty() {
        return Err(ParticipantError::DuplicateCodes(duplicates.into_iter().collect()));
    }

    let clashes: Vec<String> = batch
        .iter()
        .filter(|entry| existing_codes.iter().any(|c| c == &entry.code))
        .map(|entry| entry.code.clone())
        .collect();
    if !clashes.is_empty() {
        return Err(ParticipantError::ExistingCodes(clashes));
    }

    Ok(())
}

/// Parse, validate and store a bulk upload. Returns the number inserted.
pub fn import_bulk(conn: &Connection, text: &str) -> Result<usize> {
    let batch = parse_bulk_text(text);

    let codes: Vec<String> = batch.iter().map(|p| p.code.clone()).collect();
    let existing = db::find_existing_codes(conn, &codes)?;

    if let Err(e) = validate_bulk(&batch, &existing) {
        tracing::warn!(error = %e, "bulk upload rejected");
        return Err(e.into());
    }

    let participants: Vec<Participant> = batch
        .into_iter()
        .map(NewParticipant::into_participant)
        .collect();

    db::insert_participants(conn, &participants)
}

/// Case-insensitive match on name or code; a blank term keeps everything
pub fn search_participants<'a>(participants: &'a [Participant], term: &str) -> Vec<&'a Participant> {
    let term = term.trim().to_lowercase();
    participants
        .iter()
        .filter(|p| {
            term.is_empty()
                || p.full_name.to_lowercase().contains(&term)
                || p.code.to_lowercase().contains(&term)
        })
        .collect()
}
