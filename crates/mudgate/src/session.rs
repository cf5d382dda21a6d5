use std::fmt;

/// Random 128-bit id for one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u128);

impl SessionId {
    pub fn random() -> anyhow::Result<Self> {
        let mut b = [0u8; 16];
        getrandom::getrandom(&mut b).map_err(|e| anyhow::anyhow!("getrandom failed: {e}"))?;
        Ok(Self(u128::from_be_bytes(b)))
    }

    pub fn short(self) -> u64 {
        // Good enough for logs/UI: XOR high/low halves.
        (self.0 as u64) ^ ((self.0 >> 64) as u64)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.short())
    }
}
