// exemptions.rs — Exemption record subcommands: list, show.

use clap::Subcommand;
use ishield_exemption::{ExemptionStore, JsonDirExemptionStore};

use crate::settings::ShieldSettings;

#[derive(Subcommand)]
pub enum ExemptionsCommands {
    /// List exemption records.
    List,
    /// Show one record's admission results.
    Show {
        /// Record (constraint) name.
        name: String,
        /// Print the raw record as JSON.
        #[arg(long)]
        json: bool,
    },
}

pub fn execute(cmd: &ExemptionsCommands, settings: &ShieldSettings) -> anyhow::Result<()> {
    let store = JsonDirExemptionStore::new(&settings.exemption_dir)?;
    match cmd {
        ExemptionsCommands::List => {
            let records = store.list()?;
            if records.is_empty() {
                println!("No exemption records in {}", settings.exemption_dir.display());
                return Ok(());
            }
            println!("{:<40} {:>8}  LAST UPDATE", "NAME", "RESULTS");
            for record in &records {
                println!(
                    "{:<40} {:>8}  {}",
                    record.name,
                    record.spec.admission_results.len(),
                    record.spec.last_update
                );
            }
            Ok(())
        }
        ExemptionsCommands::Show { name, json } => {
            let Some(record) = store.get(name)? else {
                anyhow::bail!("no exemption record named {}", name);
            };
            if *json {
                println!("{}", serde_json::to_string_pretty(&record)?);
                return Ok(());
            }
            println!("Constraint:  {}", record.spec.constraint_name);
            println!("Last update: {}", record.spec.last_update);
            for result in &record.spec.admission_results {
                println!("  {}  {}", result.identity(), result.reason);
            }
            Ok(())
        }
    }
}
