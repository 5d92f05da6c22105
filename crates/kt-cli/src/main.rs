use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use kt_eval::ObjectiveEvaluator;
use kt_optimizer::{build_strategy, Driver, JournalStore, OptimizationConfig, Trial};
use kt_types::{CovarianceParams, EvaluationResult, EvaluatorConfig, ParamSample};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "kalman-tune",
    version,
    about = "Tune Kalman filter process covariances against a recorded scenario"
)]
struct Cli {
    /// Log filter used when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StrategyArg {
    Grid,
    Random,
    Bayesian,
}

impl StrategyArg {
    fn name(self) -> &'static str {
        match self {
            StrategyArg::Grid => "grid",
            StrategyArg::Random => "random",
            StrategyArg::Bayesian => "bayesian",
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the optimization driver for an experiment.
    Tune {
        /// Evaluator settings (YAML).
        #[arg(long)]
        settings: PathBuf,
        /// Experiment name; names the trial journal.
        #[arg(long)]
        experiment: String,
        /// Total number of trials the experiment should hold.
        #[arg(long)]
        max_evals: usize,
        #[arg(long, default_value_t = 1)]
        workers: usize,
        #[arg(long, value_enum, default_value_t = StrategyArg::Bayesian)]
        strategy: StrategyArg,
        /// Journal directory; defaults to the results root.
        #[arg(long)]
        store_dir: Option<PathBuf>,
        #[arg(long, default_value = "kalman")]
        exp_key: String,
        #[arg(long, default_value_t = 0.3)]
        exploration_weight: f64,
        #[arg(long, default_value_t = 3)]
        grid_steps: usize,
        #[arg(long)]
        json: bool,
    },
    /// Run a single trial and print its result.
    Evaluate {
        #[arg(long)]
        settings: PathBuf,
        /// Parameter as name=value; repeat for x, y, a, v, theta and omega.
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, f64)>,
        /// Treat values as raw samples and apply the reciprocal transform.
        #[arg(long)]
        sampled: bool,
        #[arg(long)]
        json: bool,
    },
}

fn parse_param(raw: &str) -> Result<(String, f64), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{raw}'"))?;
    let value: f64 = value
        .trim()
        .parse()
        .map_err(|e| format!("invalid value for '{name}': {e}"))?;
    Ok((name.trim().to_string(), value))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    match cli.command {
        Commands::Tune {
            settings,
            experiment,
            max_evals,
            workers,
            strategy,
            store_dir,
            exp_key,
            exploration_weight,
            grid_steps,
            json,
        } => {
            let evaluator_config = load_settings(&settings)?;
            let store_dir = store_dir.unwrap_or_else(|| evaluator_config.results_root.clone());
            let evaluator = ObjectiveEvaluator::new(evaluator_config)?;

            let mut config = OptimizationConfig::covariance(experiment.as_str(), strategy.name())
                .with_max_trials(max_evals)
                .with_concurrency(workers)
                .with_exp_key(exp_key);
            config.exploration_weight = exploration_weight;
            config.grid_steps = grid_steps;

            let search = build_strategy(
                &config.strategy,
                config.search_space.clone(),
                config.direction,
                config.exploration_weight,
                config.grid_steps,
            )?;
            let store = Arc::new(JournalStore::open(&store_dir, &experiment)?);
            info!("Trial journal: {}", store.path().display());

            let mut driver = Driver::new(config, search, store);
            let status = driver.run(Arc::new(evaluator)).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!(
                    "completed: {}  failed: {}",
                    status.trials_completed, status.trials_failed
                );
                match &status.best_trial {
                    Some(best) => print_best(best),
                    None => println!("no successful trial"),
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Evaluate {
            settings,
            params,
            sampled,
            json,
        } => {
            let evaluator = ObjectiveEvaluator::new(load_settings(&settings)?)?;
            let values: ParamSample = params.into_iter().collect();
            let result = if sampled {
                evaluator.evaluate_sampled(&values).await?
            } else {
                evaluator.evaluate(&CovarianceParams::from_map(&values)?).await?
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_result(&result);
            }
            Ok(if result.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

fn load_settings(path: &PathBuf) -> Result<EvaluatorConfig> {
    EvaluatorConfig::from_yaml_file(path)
        .with_context(|| format!("loading settings from {}", path.display()))
}

fn print_result(result: &EvaluationResult) {
    println!("trial:  {}", result.trial_id);
    println!("state:  {}", result.state);
    println!("logs:   {}", result.log_path.display());
    match result.loss {
        Some(loss) => println!("loss:   {loss:.6}"),
        None => println!("loss:   -"),
    }
    if let Some(error) = &result.error {
        println!("error:  {error}");
    }
}

fn print_best(best: &Trial) {
    let Some(result) = &best.result else {
        return;
    };
    println!("best trial #{} ({})", best.trial_number, result.trial_id);
    if let Some(loss) = result.loss {
        println!("  loss: {loss:.6}");
    }
    for (name, value) in result.params.named() {
        println!("  {name}: {value:e}");
    }
    println!("  logs: {}", result.log_path.display());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_name_value_pairs() {
        assert_eq!(parse_param("theta=0.25").unwrap(), ("theta".to_string(), 0.25));
        assert_eq!(parse_param(" x = 1e-3").unwrap(), ("x".to_string(), 1e-3));
        assert!(parse_param("theta").is_err());
        assert!(parse_param("theta=abc").is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn tune_arguments_parse() {
        let cli = Cli::try_parse_from([
            "kalman-tune",
            "tune",
            "--settings",
            "tuning.yaml",
            "--experiment",
            "circle_002",
            "--max-evals",
            "200",
            "--workers",
            "4",
            "--strategy",
            "random",
        ])
        .unwrap();
        match cli.command {
            Commands::Tune {
                max_evals,
                workers,
                strategy,
                exp_key,
                ..
            } => {
                assert_eq!(max_evals, 200);
                assert_eq!(workers, 4);
                assert_eq!(strategy.name(), "random");
                assert_eq!(exp_key, "kalman");
            }
            _ => panic!("expected tune"),
        }
    }

    #[test]
    fn evaluate_collects_params() {
        let cli = Cli::try_parse_from([
            "kalman-tune",
            "evaluate",
            "--settings",
            "tuning.yaml",
            "--param",
            "x=1",
            "--param",
            "y=2",
            "--sampled",
        ])
        .unwrap();
        match cli.command {
            Commands::Evaluate { params, sampled, .. } => {
                assert!(sampled);
                assert_eq!(params, vec![("x".to_string(), 1.0), ("y".to_string(), 2.0)]);
            }
            _ => panic!("expected evaluate"),
        }
    }

    #[test]
    fn missing_settings_file_is_reported() {
        let err = load_settings(&PathBuf::from("/nonexistent/tuning.yaml")).unwrap_err();
        assert!(err.to_string().contains("loading settings"));
    }
}
