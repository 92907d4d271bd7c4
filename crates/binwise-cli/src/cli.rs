use binwise_classifiers::{ClassifierVariant, SafetyVariant};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "binwise")]
#[command(author, version, about = "Classify waste photos into disposal decisions")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Pipeline configuration file (missing file means defaults)
    #[arg(short, long, global = true, env = "BINWISE_CONFIG", default_value = "binwise.yaml")]
    pub config: PathBuf,

    /// Override the classifier variant (mock, zero-shot, lightweight)
    #[arg(long, global = true, value_parser = parse_classifier)]
    pub classifier: Option<ClassifierVariant>,

    /// Override the safety validator variant (mock, quality)
    #[arg(long, global = true, value_parser = parse_safety)]
    pub safety: Option<SafetyVariant>,

    /// Override the HIGH tier threshold
    #[arg(long, global = true)]
    pub high: Option<f32>,

    /// Override the MEDIUM tier threshold
    #[arg(long, global = true)]
    pub medium: Option<f32>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Print Prometheus metrics to stderr on exit
    #[arg(long, global = true)]
    pub metrics: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Classify image files and print one JSON decision per file
    Classify {
        /// Image files to classify
        #[arg(required_unless_present = "placeholder")]
        paths: Vec<PathBuf>,

        /// Classify the blank placeholder image instead of files
        #[arg(long)]
        placeholder: bool,

        /// Abort on the first failing image instead of reporting each
        #[arg(long)]
        fail_fast: bool,
    },

    /// Print loaded model names, versions and thresholds
    Info,

    /// Print readiness and circuit breaker state
    Health,

    /// Print the effective configuration as YAML
    Config,
}

fn parse_classifier(s: &str) -> Result<ClassifierVariant, String> {
    s.parse()
}

fn parse_safety(s: &str) -> Result<SafetyVariant, String> {
    s.parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_classify_with_overrides() {
        let cli = Cli::try_parse_from([
            "binwise",
            "--classifier",
            "zero-shot",
            "--high",
            "0.9",
            "classify",
            "a.jpg",
            "b.png",
        ])
        .unwrap();

        assert_eq!(cli.classifier, Some(ClassifierVariant::ZeroShot));
        assert_eq!(cli.high, Some(0.9));
        match cli.command {
            Commands::Classify { paths, placeholder, .. } => {
                assert_eq!(paths.len(), 2);
                assert!(!placeholder);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_classify_requires_input() {
        assert!(Cli::try_parse_from(["binwise", "classify"]).is_err());
        assert!(Cli::try_parse_from(["binwise", "classify", "--placeholder"]).is_ok());
    }

    #[test]
    fn test_unknown_variant_rejected() {
        assert!(Cli::try_parse_from(["binwise", "--classifier", "resnet", "info"]).is_err());
    }
}
