// ============================
// crates/client-lib/src/room_id.rs
// ============================
/** Room identifier generation
Room ids are 4 bytes of OS entropy rendered as lowercase hex in two
4-character groups, e.g. `a1b2-c3d4`. */
use rand::{rngs::OsRng, TryRngCore};

use crate::error::ClientError;

/// Number of random bytes behind a room id (32 bits)
const ROOM_ID_BYTES: usize = 4;

/** Generate a fresh room identifier
# Errors
Fails only if the OS entropy source is unavailable. */
pub fn generate_room_id() -> Result<String, ClientError> {
    let mut bytes = [0u8; ROOM_ID_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| ClientError::Internal(format!("entropy source unavailable: {e}")))?;
    Ok(format_room_id(bytes))
}

fn format_room_id(bytes: [u8; ROOM_ID_BYTES]) -> String {
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!("{}-{}", &hex[..4], &hex[4..])
}
