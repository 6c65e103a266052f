//! Codec configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use atosave_common::{CipherIv, CipherKey, Error, Result};
use atosave_crypto::DEFAULT_CHUNK_SIZE;
use atosave_graph::{ForwardingRule, TypeForwardingRegistry};

/// Static configuration supplied once at startup.
///
/// Every save written by the game uses the same key and IV. They are
/// still configuration here, never built into the library.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodecConfig {
    /// DES key.
    pub key: CipherKey,
    /// CBC initialization vector.
    pub iv: CipherIv,
    /// Bytes per read or write between cancellation checks.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Legacy type names and their current replacements.
    #[serde(default)]
    pub forwarding: Vec<ForwardingRule>,
    /// Copy an existing save to `<path>.backup` before replacing it.
    #[serde(default = "default_backup")]
    pub backup: bool,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_backup() -> bool {
    true
}

impl CodecConfig {
    /// Configuration with default chunking, no forwarding rules and
    /// backups enabled.
    pub fn new(key: CipherKey, iv: CipherIv) -> Self {
        Self {
            key,
            iv,
            chunk_size: DEFAULT_CHUNK_SIZE,
            forwarding: Vec::new(),
            backup: true,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_forwarding(mut self, rules: impl IntoIterator<Item = ForwardingRule>) -> Self {
        self.forwarding.extend(rules);
        self
    }

    pub fn with_backup(mut self, backup: bool) -> Self {
        self.backup = backup;
        self
    }

    /// Check the configuration and build its forwarding registry.
    ///
    /// # Errors
    /// - Zero chunk size
    /// - Invalid forwarding rules (empty, self-mapping, conflicting, cyclic)
    pub fn validate(&self) -> Result<TypeForwardingRegistry> {
        if self.chunk_size == 0 {
            return Err(Error::Config("Chunk size must be positive".to_string()));
        }
        TypeForwardingRegistry::new(self.forwarding.iter().cloned())
    }

    /// Serialize configuration to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Read a JSON configuration file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CodecConfig {
        CodecConfig::new(
            CipherKey::from_bytes([1, 2, 3, 4, 5, 6, 7, 8]),
            CipherIv::from_bytes([8, 7, 6, 5, 4, 3, 2, 1]),
        )
    }

    #[test]
    fn test_config_json_roundtrip() {
        let original = config()
            .with_chunk_size(512)
            .with_forwarding(vec![ForwardingRule::new("Old.GameData", "GameData")])
            .with_backup(false);

        let json = original.to_json().unwrap();
        let parsed = CodecConfig::from_json(&json).unwrap();

        assert_eq!(parsed.key, original.key);
        assert_eq!(parsed.iv, original.iv);
        assert_eq!(parsed.chunk_size, 512);
        assert_eq!(parsed.forwarding, original.forwarding);
        assert!(!parsed.backup);
    }

    #[test]
    fn test_defaults_applied() {
        let parsed =
            CodecConfig::from_json(r#"{"key":[1,2,3,4,5,6,7,8],"iv":[0,0,0,0,0,0,0,0]}"#).unwrap();
        assert_eq!(parsed.chunk_size, DEFAULT_CHUNK_SIZE);
        assert!(parsed.forwarding.is_empty());
        assert!(parsed.backup);
    }

    #[test]
    fn test_short_key_rejected() {
        let result = CodecConfig::from_json(r#"{"key":[1,2,3],"iv":[0,0,0,0,0,0,0,0]}"#);
        assert!(matches!(result, Err(Error::Serialization(_))));
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let result = config().with_chunk_size(0).validate();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_cyclic_forwarding_rejected() {
        let result = config()
            .with_forwarding(vec![
                ForwardingRule::new("a", "b"),
                ForwardingRule::new("b", "a"),
            ])
            .validate();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("codec.json");
        tokio::fs::write(&path, config().to_json().unwrap()).await.unwrap();

        let loaded = CodecConfig::load(&path).await.unwrap();
        assert_eq!(loaded.key, config().key);
    }

    #[test]
    fn test_debug_redacts_key() {
        let debug = format!("{:?}", config());
        assert!(!debug.contains("1, 2, 3, 4"));
    }
}
