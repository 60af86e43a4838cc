//! CLI argument definitions for the `transit` binary.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use transit_keys::{KdfMode, KeyType};

/// transit -- named key policies and envelope encryption.
#[derive(Parser)]
#[command(
    name = "transit",
    version,
    about = "transit -- named key policies and envelope encryption",
    long_about = "Manage versioned key policies and encrypt, decrypt, rewrap and generate \
                  data keys against them. Plaintexts and contexts are base64; every \
                  command prints a JSON response."
)]
pub struct Cli {
    /// Path to the SQLite database holding policies.
    #[arg(long, global = true, default_value = "data/transit.db")]
    pub db: PathBuf,

    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "config/default.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a policy. Returns the existing one unchanged if present.
    Create {
        name: String,

        /// Key algorithm.
        #[arg(long, default_value = "aes256-gcm96", value_parser = parse_key_type)]
        key_type: KeyType,

        /// Derive a distinct key per context.
        #[arg(long)]
        derived: bool,

        /// Derivation function for derived policies.
        #[arg(long, default_value = "hkdf_sha256", value_parser = parse_kdf)]
        kdf: KdfMode,

        /// Deterministic encryption; requires --derived.
        #[arg(long)]
        convergent: bool,

        /// Allow raw key export.
        #[arg(long)]
        exportable: bool,

        /// Allow the policy to be deleted.
        #[arg(long)]
        allow_deletion: bool,
    },

    /// Show policy metadata.
    Read { name: String },

    /// List policy names.
    List,

    /// Encrypt base64 plaintext.
    Encrypt {
        name: String,

        /// Base64-encoded plaintext.
        #[arg(long)]
        plaintext: String,

        /// Base64-encoded context for derived policies.
        #[arg(long)]
        context: Option<String>,

        /// Encrypt with a specific key version.
        #[arg(long)]
        key_version: Option<u32>,
    },

    /// Decrypt a ciphertext envelope.
    Decrypt {
        name: String,

        #[arg(long)]
        ciphertext: String,

        #[arg(long)]
        context: Option<String>,
    },

    /// Re-encrypt a ciphertext under the latest key version.
    Rewrap {
        name: String,

        #[arg(long)]
        ciphertext: String,

        #[arg(long)]
        context: Option<String>,
    },

    /// Add a new key version.
    Rotate { name: String },

    /// Raise the minimum decryption and/or encryption version.
    Retire {
        name: String,

        #[arg(long)]
        min_decryption_version: Option<u32>,

        #[arg(long)]
        min_encryption_version: Option<u32>,
    },

    /// Generate a data key wrapped under a policy.
    Datakey {
        /// `plaintext` or `wrapped`.
        mode: String,

        name: String,

        /// Key size: 128, 256 or 512.
        #[arg(long)]
        bits: Option<u32>,

        #[arg(long)]
        context: Option<String>,
    },

    /// Export raw key material of an exportable policy.
    Export {
        name: String,

        /// Export a single version instead of all usable ones.
        #[arg(long)]
        version: Option<u32>,
    },

    /// Toggle policy flags.
    Config {
        name: String,

        #[arg(long)]
        deletion_allowed: Option<bool>,

        /// Can only be switched on.
        #[arg(long)]
        exportable: Option<bool>,
    },

    /// Delete a policy whose deletion is allowed.
    Delete { name: String },
}

fn parse_key_type(s: &str) -> Result<KeyType, String> {
    KeyType::parse(s).ok_or_else(|| format!("unknown key type {s:?}"))
}

fn parse_kdf(s: &str) -> Result<KdfMode, String> {
    KdfMode::parse(s).ok_or_else(|| format!("unknown kdf {s:?}"))
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_create_flags() {
        let cli = Cli::try_parse_from([
            "transit",
            "--db",
            "/tmp/t.db",
            "create",
            "orders",
            "--derived",
            "--convergent",
            "--key-type",
            "chacha20-poly1305",
        ])
        .unwrap();
        assert_eq!(cli.db, PathBuf::from("/tmp/t.db"));
        match cli.command {
            Commands::Create {
                name,
                key_type,
                derived,
                convergent,
                kdf,
                ..
            } => {
                assert_eq!(name, "orders");
                assert_eq!(key_type, KeyType::ChaCha20Poly1305);
                assert!(derived && convergent);
                assert_eq!(kdf, KdfMode::HkdfSha256);
            }
            _ => panic!("expected create"),
        }
    }

    #[test]
    fn rejects_unknown_key_type() {
        let result = Cli::try_parse_from(["transit", "create", "k", "--key-type", "des"]);
        assert!(result.is_err());
    }
}
