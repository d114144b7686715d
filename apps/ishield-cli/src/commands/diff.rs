// diff.rs — Masked structural diff of two manifests.

use std::path::PathBuf;

use clap::Args;
use ishield_policy::engine::MUTATION_MASK;

use super::read_node;

#[derive(Args)]
pub struct DiffArgs {
    /// Manifest before the change (JSON or YAML).
    before: PathBuf,
    /// Manifest after the change (JSON or YAML).
    after: PathBuf,
    /// Mask path dropped from both sides before comparing; repeatable.
    #[arg(long)]
    mask: Vec<String>,
    /// Also mask the fields the admission controller treats as mutable.
    #[arg(long)]
    mutation_mask: bool,
    /// Key pattern whose differences are reported as ignored; repeatable.
    #[arg(long)]
    ignore: Vec<String>,
    /// Print the differences as JSON.
    #[arg(long)]
    json: bool,
}

pub fn execute(args: &DiffArgs) -> anyhow::Result<()> {
    let mut masks = args.mask.clone();
    if args.mutation_mask {
        masks.extend(MUTATION_MASK.iter().map(|m| m.to_string()));
    }
    let before = read_node(&args.before)?.mask(&masks);
    let after = read_node(&args.after)?.mask(&masks);
    let split = before.diff(&after).filter(&args.ignore);

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "differences": split.unfiltered,
                "ignored": split.filtered,
            }))?
        );
        return Ok(());
    }

    if split.unfiltered.is_empty() && split.filtered.is_empty() {
        println!("No differences.");
        return Ok(());
    }
    for item in &split.unfiltered.items {
        println!("{}", describe(item));
    }
    for (item, pattern) in split.filtered.items.iter().zip(&split.matched_keys) {
        println!("{}  (ignored by {})", describe(item), pattern);
    }
    Ok(())
}

fn describe(item: &ishield_mapnode::Difference) -> String {
    let show = |n: Option<&ishield_mapnode::Node>| match n {
        Some(node) => node.to_value().to_string(),
        None => "<absent>".to_string(),
    };
    format!("{}: {} -> {}", item.key, show(item.before()), show(item.after()))
}
