//! CLI entry point for the transit engine.
//!
//! This binary provides the `transit` command. Each subcommand runs one
//! engine operation against a SQLite-backed policy store and prints the JSON
//! response on stdout. Engine errors are printed as a JSON error body on
//! stderr with a non-zero exit code.

mod cli;
mod helpers;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use serde_json::{Value, json};
use tracing::{debug, error};
use transit_keys::wire::{self, DataKeyRequest, DecryptRequest, EncryptRequest, ErrorResponse};
use transit_keys::{ConfigUpdate, PolicyManager, PolicyOptions, TransitError};

use crate::cli::{Cli, Commands};

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    helpers::init_tracing("info");

    let config = helpers::load_config(&cli.config)?;
    let manager = helpers::open_manager(&cli.db, config).await?;

    match dispatch(&manager, cli.command).await {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => match err.downcast_ref::<TransitError>() {
            Some(transit_err) => {
                error!(kind = transit_err.kind(), "{transit_err}");
                let body = ErrorResponse::from(transit_err);
                eprintln!("{}", serde_json::to_string_pretty(&body)?);
                Ok(ExitCode::FAILURE)
            }
            None => Err(err),
        },
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

async fn dispatch(manager: &PolicyManager, command: Commands) -> Result<Value> {
    let value = match command {
        Commands::Create {
            name,
            key_type,
            derived,
            kdf,
            convergent,
            exportable,
            allow_deletion,
        } => {
            let options = PolicyOptions {
                key_type,
                derived,
                kdf,
                convergent_encryption: convergent,
                exportable,
                deletion_allowed: allow_deletion,
            };
            serde_json::to_value(manager.create(&name, &options).await?)?
        }

        Commands::Read { name } => serde_json::to_value(manager.read(&name).await?)?,

        Commands::List => json!({ "keys": manager.list().await? }),

        Commands::Encrypt {
            name,
            plaintext,
            context,
            key_version,
        } => {
            let req = EncryptRequest {
                name,
                plaintext,
                context,
                key_version,
            };
            serde_json::to_value(wire::handle_encrypt(manager, &req).await?)?
        }

        Commands::Decrypt {
            name,
            ciphertext,
            context,
        } => {
            let req = DecryptRequest {
                name,
                ciphertext,
                context,
            };
            serde_json::to_value(wire::handle_decrypt(manager, &req).await?)?
        }

        Commands::Rewrap {
            name,
            ciphertext,
            context,
        } => {
            let req = DecryptRequest {
                name,
                ciphertext,
                context,
            };
            serde_json::to_value(wire::handle_rewrap(manager, &req).await?)?
        }

        Commands::Rotate { name } => {
            let version = manager.rotate(&name).await?;
            json!({ "name": name, "latest_version": version })
        }

        Commands::Retire {
            name,
            min_decryption_version,
            min_encryption_version,
        } => serde_json::to_value(
            manager
                .retire(&name, min_decryption_version, min_encryption_version)
                .await?,
        )?,

        Commands::Datakey {
            mode,
            name,
            bits,
            context,
        } => {
            let req = DataKeyRequest {
                name,
                mode,
                context,
                bits,
            };
            serde_json::to_value(wire::handle_datakey(manager, &req).await?)?
        }

        Commands::Export { name, version } => {
            serde_json::to_value(manager.export_key(&name, version).await?)?
        }

        Commands::Config {
            name,
            deletion_allowed,
            exportable,
        } => {
            let update = ConfigUpdate {
                deletion_allowed,
                exportable,
            };
            serde_json::to_value(manager.update_config(&name, update).await?)?
        }

        Commands::Delete { name } => {
            manager.delete(&name).await?;
            json!({ "deleted": name })
        }
    };

    debug!("command completed");
    Ok(value)
}
