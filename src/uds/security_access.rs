//! Provides methods for security seed/key access to the ECU in order to
//! unlock functions which are considered secure, such as writing or reading
//! to specific memory regions
//!
//! Key derivation is ECU specific and supplied through
//! [crate::client::SecurityAlgorithm]; this module only drives the
//! seed/key exchange.

use automotive_diag::uds::UdsCommand;

use crate::{DiagError, DiagServerResult, client::UdsSession, transport::DiagTransport};

impl<T: DiagTransport> UdsSession<T> {
    /// Requests a seed from the ECU for the given security level (an odd
    /// requestSeed sub-function value).
    ///
    /// ## Returns
    /// The raw seed bytes. An all-zero seed means the level is already
    /// unlocked
    pub fn request_seed(&self, level: u8, seed_params: &[u8]) -> DiagServerResult<Vec<u8>> {
        let mut args = Vec::with_capacity(seed_params.len() + 1);
        args.push(level);
        args.extend_from_slice(seed_params);
        let resp = self
            .send_command_checked(UdsCommand::SecurityAccess, &args)?
            .into_positive()?;
        // Remove SID and sub-function, so just the seed value is left
        let mut bytes = resp.bytes;
        if bytes.len() < 2 {
            return Err(DiagError::InvalidResponseLength);
        }
        bytes.drain(0..2);
        Ok(bytes)
    }

    /// Sends a computed key for the level whose seed was requested with
    /// `level` (the matching even sendKey sub-function is `level + 1`)
    pub fn send_key(&self, level: u8, key: &[u8]) -> DiagServerResult<()> {
        let mut args = Vec::with_capacity(key.len() + 1);
        args.push(level.wrapping_add(1));
        args.extend_from_slice(key);
        self.send_command_checked(UdsCommand::SecurityAccess, &args)?
            .into_positive()
            .map(|_| ())
    }

    /// Unlocks a security level: requests the seed, derives the key with the
    /// configured [crate::client::SecurityAlgorithm] and sends it back.
    ///
    /// An all-zero seed short-circuits: the level is already unlocked and no
    /// key is sent.
    pub fn unlock_security_access(&self, level: u8, seed_params: &[u8]) -> DiagServerResult<()> {
        let algorithm = self
            .config()
            .security_algorithm
            .clone()
            .ok_or(DiagError::NoSecurityAlgorithm)?;
        let seed = self.request_seed(level, seed_params)?;
        if !seed.is_empty() && seed.iter().all(|b| *b == 0) {
            log::debug!("Security level 0x{level:02X} is already unlocked");
            return Ok(());
        }
        let key = algorithm.compute_key(level, &seed)?;
        self.send_key(level, &key)
    }
}
