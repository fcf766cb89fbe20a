//! Chunked credential provisioning over the bus
//!
//! Credentials arrive as a sequence of frames on the provisioning identifier.
//! The first payload byte selects the message:
//!
//! | subtype | layout | meaning |
//! |---------|--------|---------|
//! | 1 | `[1, name_len, secret_len]` | start a session |
//! | 2 | `[2, _, bytes...]` | next piece of the network name |
//! | 3 | `[3, _, bytes...]` | next piece of the secret |
//! | 4 | `[4, checksum]` | end of session |
//!
//! The checksum is the XOR of every name byte followed by every secret byte.
//! A session is committed only when both fields arrived in full and the
//! checksum matches; anything else discards it. Chunks never write past the
//! declared length, so the fixed buffers cannot overflow.

use busrelay_core::BusFrame;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::credential::Credential;

/// Longest network name the protocol carries
pub const MAX_NAME_LEN: usize = 32;

/// Longest secret the protocol carries
pub const MAX_SECRET_LEN: usize = 63;

/// Offset of chunk data within a chunk frame
const CHUNK_DATA_OFFSET: usize = 2;

const SUBTYPE_START: u8 = 1;
const SUBTYPE_NAME_CHUNK: u8 = 2;
const SUBTYPE_SECRET_CHUNK: u8 = 3;
const SUBTYPE_END: u8 = 4;

/// A decoded provisioning frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningMessage<'a> {
    /// Begin a session with the declared field lengths
    Start {
        /// Declared network name length
        name_len: u8,
        /// Declared secret length
        secret_len: u8,
    },
    /// A piece of the network name
    NameChunk(&'a [u8]),
    /// A piece of the secret
    SecretChunk(&'a [u8]),
    /// End of session carrying the sender's checksum
    End {
        /// XOR of all name bytes then all secret bytes
        checksum: u8,
    },
}

impl<'a> ProvisioningMessage<'a> {
    /// Decode a provisioning frame payload
    pub fn parse(payload: &'a [u8]) -> Result<Self, IgnoreReason> {
        let (&subtype, _) = payload.split_first().ok_or(IgnoreReason::Empty)?;

        match subtype {
            SUBTYPE_START => match payload {
                [_, name_len, secret_len, ..] => Ok(ProvisioningMessage::Start {
                    name_len: *name_len,
                    secret_len: *secret_len,
                }),
                _ => Err(IgnoreReason::Truncated { subtype }),
            },
            SUBTYPE_NAME_CHUNK => Ok(ProvisioningMessage::NameChunk(chunk_data(payload))),
            SUBTYPE_SECRET_CHUNK => Ok(ProvisioningMessage::SecretChunk(chunk_data(payload))),
            SUBTYPE_END => match payload {
                [_, checksum, ..] => Ok(ProvisioningMessage::End {
                    checksum: *checksum,
                }),
                _ => Err(IgnoreReason::Truncated { subtype }),
            },
            other => Err(IgnoreReason::UnknownSubtype(other)),
        }
    }
}

fn chunk_data(payload: &[u8]) -> &[u8] {
    payload.get(CHUNK_DATA_OFFSET..).unwrap_or(&[])
}

/// Why a provisioning frame had no effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IgnoreReason {
    /// Frame carried no subtype byte
    #[error("empty provisioning frame")]
    Empty,
    /// Subtype outside 1..=4
    #[error("unknown provisioning subtype {0}")]
    UnknownSubtype(u8),
    /// Frame too short for its subtype
    #[error("truncated provisioning frame for subtype {subtype}")]
    Truncated {
        /// Subtype byte of the truncated frame
        subtype: u8,
    },
    /// Chunk or end received with no session in progress
    #[error("no provisioning session in progress")]
    NotCollecting,
}

/// Why a session was discarded without committing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProvisioningRejection {
    /// Start declared lengths the buffers cannot hold
    #[error(
        "declared lengths out of range: name {name_len} (max 32), secret {secret_len} (max 63)"
    )]
    LengthOutOfRange {
        /// Declared network name length
        name_len: u8,
        /// Declared secret length
        secret_len: u8,
    },
    /// End arrived before every declared byte did
    #[error(
        "length mismatch: name {name_received}/{name_expected} bytes, secret {secret_received}/{secret_expected} bytes"
    )]
    LengthMismatch {
        /// Name bytes received
        name_received: usize,
        /// Name bytes declared
        name_expected: usize,
        /// Secret bytes received
        secret_received: usize,
        /// Secret bytes declared
        secret_expected: usize,
    },
    /// Sender's checksum differs from ours
    #[error("checksum mismatch: frame carried 0x{received:02X}, computed 0x{computed:02X}")]
    ChecksumMismatch {
        /// Checksum carried by the end frame
        received: u8,
        /// Checksum over the received bytes
        computed: u8,
    },
    /// Completed bytes are not text
    #[error("credential bytes are not valid UTF-8")]
    InvalidEncoding,
}

/// Which credential field a chunk belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialField {
    /// Network name
    Name,
    /// Secret
    Secret,
}

/// Result of feeding one frame to the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningEvent {
    /// A new session began
    Started {
        /// Declared network name length
        name_len: u8,
        /// Declared secret length
        secret_len: u8,
        /// Whether an in-progress session was discarded
        replaced: bool,
    },
    /// Chunk bytes were copied into a buffer
    ChunkAccepted {
        /// Field the chunk belongs to
        field: CredentialField,
        /// Bytes copied
        accepted: usize,
        /// Bytes dropped for exceeding the declared length
        dropped: usize,
    },
    /// The session validated; the credential should be committed
    Complete(Credential),
    /// The session was discarded
    Rejected(ProvisioningRejection),
    /// The frame had no effect
    Ignored(IgnoreReason),
}

/// Session phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProvisioningPhase {
    /// No session in progress
    #[default]
    Idle,
    /// Chunks are being collected
    Collecting,
}

/// Reassembly state for one credential transfer
#[derive(Debug, Clone)]
pub struct ProvisioningSession {
    phase: ProvisioningPhase,
    expected_name_len: usize,
    expected_secret_len: usize,
    name: [u8; MAX_NAME_LEN],
    secret: [u8; MAX_SECRET_LEN],
    received_name: usize,
    received_secret: usize,
}

impl Default for ProvisioningSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ProvisioningSession {
    /// Create an idle session
    pub fn new() -> Self {
        Self {
            phase: ProvisioningPhase::Idle,
            expected_name_len: 0,
            expected_secret_len: 0,
            name: [0; MAX_NAME_LEN],
            secret: [0; MAX_SECRET_LEN],
            received_name: 0,
            received_secret: 0,
        }
    }

    /// Current phase
    pub fn phase(&self) -> ProvisioningPhase {
        self.phase
    }

    /// Name bytes received so far
    pub fn received_name(&self) -> &[u8] {
        &self.name[..self.received_name]
    }

    /// Secret bytes received so far
    pub fn received_secret(&self) -> &[u8] {
        &self.secret[..self.received_secret]
    }

    /// Declared name and secret lengths of the current session
    pub fn expected_lengths(&self) -> (usize, usize) {
        (self.expected_name_len, self.expected_secret_len)
    }

    /// Drop any session in progress and return to idle
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Feed one provisioning frame
    pub fn handle_frame(&mut self, frame: &BusFrame) -> ProvisioningEvent {
        let event = match ProvisioningMessage::parse(frame.payload()) {
            Ok(message) => self.apply(message),
            Err(reason) => ProvisioningEvent::Ignored(reason),
        };
        log_event(&event);
        event
    }

    /// Apply a decoded message
    pub fn apply(&mut self, message: ProvisioningMessage<'_>) -> ProvisioningEvent {
        match message {
            ProvisioningMessage::Start {
                name_len,
                secret_len,
            } => self.start(name_len, secret_len),
            ProvisioningMessage::NameChunk(bytes) => self.accept_chunk(CredentialField::Name, bytes),
            ProvisioningMessage::SecretChunk(bytes) => {
                self.accept_chunk(CredentialField::Secret, bytes)
            }
            ProvisioningMessage::End { checksum } => self.finish(checksum),
        }
    }

    fn start(&mut self, name_len: u8, secret_len: u8) -> ProvisioningEvent {
        let replaced = self.phase == ProvisioningPhase::Collecting;
        self.reset();

        if name_len as usize > MAX_NAME_LEN || secret_len as usize > MAX_SECRET_LEN {
            return ProvisioningEvent::Rejected(ProvisioningRejection::LengthOutOfRange {
                name_len,
                secret_len,
            });
        }

        self.expected_name_len = name_len as usize;
        self.expected_secret_len = secret_len as usize;
        self.phase = ProvisioningPhase::Collecting;

        ProvisioningEvent::Started {
            name_len,
            secret_len,
            replaced,
        }
    }

    fn accept_chunk(&mut self, field: CredentialField, bytes: &[u8]) -> ProvisioningEvent {
        if self.phase != ProvisioningPhase::Collecting {
            return ProvisioningEvent::Ignored(IgnoreReason::NotCollecting);
        }

        let (buffer, received, expected): (&mut [u8], &mut usize, usize) = match field {
            CredentialField::Name => (
                &mut self.name[..],
                &mut self.received_name,
                self.expected_name_len,
            ),
            CredentialField::Secret => (
                &mut self.secret[..],
                &mut self.received_secret,
                self.expected_secret_len,
            ),
        };

        let remaining = expected - *received;
        let accepted = bytes.len().min(remaining);
        buffer[*received..*received + accepted].copy_from_slice(&bytes[..accepted]);
        *received += accepted;

        ProvisioningEvent::ChunkAccepted {
            field,
            accepted,
            dropped: bytes.len() - accepted,
        }
    }

    fn finish(&mut self, checksum: u8) -> ProvisioningEvent {
        if self.phase != ProvisioningPhase::Collecting {
            return ProvisioningEvent::Ignored(IgnoreReason::NotCollecting);
        }

        let result = self.validate(checksum);
        self.reset();

        match result {
            Ok(credential) => ProvisioningEvent::Complete(credential),
            Err(rejection) => ProvisioningEvent::Rejected(rejection),
        }
    }

    fn validate(&self, checksum: u8) -> Result<Credential, ProvisioningRejection> {
        if self.received_name != self.expected_name_len
            || self.received_secret != self.expected_secret_len
        {
            return Err(ProvisioningRejection::LengthMismatch {
                name_received: self.received_name,
                name_expected: self.expected_name_len,
                secret_received: self.received_secret,
                secret_expected: self.expected_secret_len,
            });
        }

        let computed = xor_checksum(self.received_name(), self.received_secret());
        if computed != checksum {
            return Err(ProvisioningRejection::ChecksumMismatch {
                received: checksum,
                computed,
            });
        }

        let name = String::from_utf8(self.received_name().to_vec())
            .map_err(|_| ProvisioningRejection::InvalidEncoding)?;
        let secret = String::from_utf8(self.received_secret().to_vec())
            .map_err(|_| ProvisioningRejection::InvalidEncoding)?;

        Ok(Credential { name, secret })
    }
}

/// XOR of every name byte followed by every secret byte
pub fn xor_checksum(name: &[u8], secret: &[u8]) -> u8 {
    name.iter().chain(secret).fold(0, |acc, b| acc ^ b)
}

fn log_event(event: &ProvisioningEvent) {
    match event {
        ProvisioningEvent::Started {
            name_len,
            secret_len,
            replaced,
        } => {
            if *replaced {
                warn!("Provisioning restarted; discarding session in progress");
            }
            info!(name_len, secret_len, "Provisioning session started");
        }
        ProvisioningEvent::ChunkAccepted {
            field,
            accepted,
            dropped,
        } => {
            if *dropped > 0 {
                warn!(?field, accepted, dropped, "Provisioning chunk exceeds declared length, truncated");
            } else {
                debug!(?field, accepted, "Provisioning chunk accepted");
            }
        }
        ProvisioningEvent::Complete(credential) => {
            info!(name = %credential.name, "Provisioning session validated");
        }
        ProvisioningEvent::Rejected(rejection) => {
            warn!(reason = %rejection, "Provisioning session discarded");
        }
        ProvisioningEvent::Ignored(reason) => {
            debug!(reason = %reason, "Provisioning frame ignored");
        }
    }
}
