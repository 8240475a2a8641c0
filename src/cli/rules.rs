use std::fmt::Write;

use anyhow::Result;
use clap::Subcommand;

use crate::{
    rules::{book::RuleBook, Rule, RuleDraft},
    storage::kv::KeyValueStore,
};

#[derive(Subcommand, Debug)]
pub enum RulesCommand {
    #[command(about = "List configured rules")]
    List,
    #[command(about = "Add a rule. Types are domain, host, prefix and regex")]
    Add {
        #[arg(help = "Rule type")]
        kind: String,
        #[arg(help = "Domain, hostname, URL prefix or regular expression")]
        value: String,
        #[arg(long, help = "Don't match subdomains of a domain rule")]
        exact: bool,
        #[arg(long, help = "Store the rule disabled")]
        disabled: bool,
    },
    #[command(about = "Remove a rule by id")]
    Remove { id: String },
}

pub async fn process_rules_command<K: KeyValueStore>(
    book: &RuleBook<K>,
    command: RulesCommand,
) -> Result<()> {
    match command {
        RulesCommand::List => print!("{}", rule_lines(&book.list().await?)),
        RulesCommand::Add {
            kind,
            value,
            exact,
            disabled,
        } => {
            let draft = RuleDraft {
                include_subdomains: Some(!exact),
                enabled: Some(!disabled),
                ..RuleDraft::new(kind, value)
            };
            let rule = book.add(draft).await?;
            println!("Added rule {}", rule.id);
        }
        RulesCommand::Remove { id } => {
            if book.remove(&id).await? {
                println!("Removed rule {id}");
            } else {
                println!("No rule with id {id}");
            }
        }
    }
    Ok(())
}

fn rule_lines(rules: &[Rule]) -> String {
    let mut output = String::new();
    for rule in rules {
        let mut flags = Vec::new();
        if rule.include_subdomains {
            flags.push("subdomains");
        }
        if !rule.enabled {
            flags.push("disabled");
        }
        let _ = writeln!(
            output,
            "{}\t{}\t{}\t{}",
            rule.id,
            rule.kind,
            rule.value,
            flags.join(",")
        );
    }
    output
}
