use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command, ValueHint};
use log::LevelFilter;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use cardfraud_cli::commands::evaluate::run_evaluation;
use cardfraud_cli::commands::input::{load_run_config, validate_csv_file, RunConfig};
use cardfraud_cli::commands::predict::run_prediction;
use cardfraud_cli::commands::promote::run_promotion;
use cardfraud_cli::commands::train::run_training;
use cardfraud_cli::serve::run_server;
use cardfraud_models::config::PipelineConfig;
use cardfraud_models::data::DatasetReaderConfig;
use cardfraud_models::pipeline::load_pipeline;

fn config_arg() -> Arg {
    Arg::new("config")
        .help("Path to the pipeline configuration file (JSON)")
        .required(true)
        .value_parser(clap::value_parser!(PathBuf))
        .value_hint(ValueHint::FilePath)
}

fn data_arg(id: &'static str, short: char, help: &'static str) -> Arg {
    Arg::new(id)
        .short(short)
        .long(id)
        .help(help)
        .value_parser(clap::value_parser!(PathBuf))
        .value_hint(ValueHint::FilePath)
}

fn main() -> Result<()> {
    env_logger::Builder::default()
        .filter_level(LevelFilter::Error)
        .parse_env(env_logger::Env::default().filter_or("CARDFRAUD_LOG", "error,cardfraud=info"))
        .init();

    let matches = Command::new("cardfraud")
        .version(clap::crate_version!())
        .about("Card-fraud model lifecycle: train, evaluate, predict, promote and serve models")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("train")
                .about("Train every candidate of the configuration and save the artifacts")
                .arg(config_arg())
                .arg(data_arg(
                    "train_data",
                    'd',
                    "Training data (CSV). Overrides train_data in the configuration file.",
                ))
                .arg(data_arg(
                    "validation_data",
                    'v',
                    "Validation data (CSV). Overrides validation_data in the configuration file.",
                ))
                .arg(
                    Arg::new("output_dir")
                        .short('o')
                        .long("output_dir")
                        .help("Directory for model artifacts [default: artifact_dir of the config]")
                        .value_parser(clap::value_parser!(PathBuf))
                        .value_hint(ValueHint::DirPath),
                ),
        )
        .subcommand(
            Command::new("evaluate")
                .about("Score a saved model on a labelled CSV file and print the metrics")
                .arg(
                    Arg::new("model")
                        .help("Path to the saved model (model.json)")
                        .required(true)
                        .value_parser(clap::value_parser!(PathBuf))
                        .value_hint(ValueHint::FilePath),
                )
                .arg(
                    Arg::new("data")
                        .help("Labelled data (CSV)")
                        .required(true)
                        .value_parser(clap::value_parser!(PathBuf))
                        .value_hint(ValueHint::FilePath),
                )
                .arg(
                    Arg::new("config")
                        .short('c')
                        .long("config")
                        .help("Pipeline configuration providing column names and precision_k")
                        .value_parser(clap::value_parser!(PathBuf))
                        .value_hint(ValueHint::FilePath),
                )
                .arg(
                    Arg::new("report")
                        .short('r')
                        .long("report")
                        .help("Write an HTML histogram of the predicted probabilities to this path")
                        .value_parser(clap::value_parser!(PathBuf))
                        .value_hint(ValueHint::FilePath),
                ),
        )
        .subcommand(
            Command::new("predict")
                .about("Score an unlabelled CSV file and write the rows with their predictions")
                .arg(
                    Arg::new("model")
                        .help("Path to the saved model (model.json)")
                        .required(true)
                        .value_parser(clap::value_parser!(PathBuf))
                        .value_hint(ValueHint::FilePath),
                )
                .arg(
                    Arg::new("input")
                        .help("Transactions to score (CSV)")
                        .required(true)
                        .value_parser(clap::value_parser!(PathBuf))
                        .value_hint(ValueHint::FilePath),
                )
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .help("Output CSV with the input columns plus pred and fraud_probability")
                        .required(true)
                        .value_parser(clap::value_parser!(PathBuf))
                        .value_hint(ValueHint::FilePath),
                )
                .arg(
                    Arg::new("config")
                        .short('c')
                        .long("config")
                        .help("Pipeline configuration providing the id and target column names")
                        .value_parser(clap::value_parser!(PathBuf))
                        .value_hint(ValueHint::FilePath),
                ),
        )
        .subcommand(
            Command::new("promote")
                .about("Train the cohort, register the best candidate and run champion/challenger")
                .arg(config_arg())
                .arg(data_arg("train_data", 'd', "Training data (CSV)"))
                .arg(data_arg("validation_data", 'v', "Validation data (CSV)"))
                .arg(data_arg(
                    "test_data",
                    't',
                    "Test data used for selection and promotion (CSV)",
                )),
        )
        .subcommand(
            Command::new("serve")
                .about("Serve fraud probabilities of a saved model over HTTP")
                .arg(
                    Arg::new("model")
                        .short('m')
                        .long("model")
                        .help("Path to the saved model (model.json)")
                        .required(true)
                        .value_parser(clap::value_parser!(PathBuf))
                        .value_hint(ValueHint::FilePath),
                )
                .arg(
                    Arg::new("host")
                        .long("host")
                        .help("Address to bind")
                        .default_value("127.0.0.1"),
                )
                .arg(
                    Arg::new("port")
                        .short('p')
                        .long("port")
                        .help("Port to listen on")
                        .default_value("8080")
                        .value_parser(clap::value_parser!(u16)),
                ),
        )
        .get_matches();

    match matches.subcommand() {
        Some(("train", sub_m)) => handle_train(sub_m),
        Some(("evaluate", sub_m)) => handle_evaluate(sub_m),
        Some(("predict", sub_m)) => handle_predict(sub_m),
        Some(("promote", sub_m)) => handle_promote(sub_m),
        Some(("serve", sub_m)) => handle_serve(sub_m),
        _ => unreachable!("Subcommand is required by CLI configuration"),
    }
}

fn required_path<'a>(matches: &'a ArgMatches, id: &str) -> Result<&'a PathBuf> {
    matches
        .get_one::<PathBuf>(id)
        .with_context(|| format!("missing argument <{}>", id))
}

fn handle_train(matches: &ArgMatches) -> Result<()> {
    let config_path = required_path(matches, "config")?;
    log::info!("[cardfraud::train] Training from config: {:?}", config_path);
    let config = RunConfig::from_arguments(config_path, matches)?;
    let output_dir = matches
        .get_one::<PathBuf>("output_dir")
        .cloned()
        .unwrap_or_else(|| config.pipeline.artifact_dir.clone());

    match run_training(&config, &output_dir) {
        Ok(artifacts) => {
            for artifact in &artifacts {
                println!("{}\t{}", artifact.name, artifact.model_path.display());
            }
            Ok(())
        }
        Err(e) => {
            log::error!("Training failed: {:#}", e);
            std::process::exit(1)
        }
    }
}

fn handle_evaluate(matches: &ArgMatches) -> Result<()> {
    let model_path = required_path(matches, "model")?;
    let data_path = required_path(matches, "data")?;
    let (reader, precision_k) = match matches.get_one::<PathBuf>("config") {
        Some(path) => {
            let config = load_run_config(path)?;
            (
                DatasetReaderConfig::from_pipeline(&config.pipeline),
                config.pipeline.precision_k,
            )
        }
        None => (
            DatasetReaderConfig::default(),
            PipelineConfig::default().precision_k,
        ),
    };

    let report = matches.get_one::<PathBuf>("report").map(PathBuf::as_path);
    let metrics = run_evaluation(model_path, data_path, &reader, precision_k, report)?;
    println!("{}", serde_json::to_string_pretty(&metrics.scalars())?);
    Ok(())
}

fn handle_predict(matches: &ArgMatches) -> Result<()> {
    let model_path = required_path(matches, "model")?;
    let input_path = required_path(matches, "input")?;
    let output_path = required_path(matches, "output")?;
    validate_csv_file(input_path)?;
    let reader = match matches.get_one::<PathBuf>("config") {
        Some(path) => DatasetReaderConfig::from_pipeline(&load_run_config(path)?.pipeline),
        None => DatasetReaderConfig::default(),
    };

    match run_prediction(model_path, input_path, output_path, &reader) {
        Ok(rows) => {
            println!("{}	{}", rows, output_path.display());
            Ok(())
        }
        Err(e) => {
            log::error!("Prediction failed: {:#}", e);
            std::process::exit(1)
        }
    }
}

fn handle_promote(matches: &ArgMatches) -> Result<()> {
    let config_path = required_path(matches, "config")?;
    log::info!("[cardfraud::promote] Running cycle from config: {:?}", config_path);
    let config = RunConfig::from_arguments(config_path, matches)?;

    match run_promotion(&config) {
        Ok(outcome) => {
            println!(
                "{}\tversion {}\t{}",
                outcome.selection.best_name, outcome.challenger.version, outcome.stage
            );
            Ok(())
        }
        Err(e) => {
            log::error!("Promotion failed: {:#}", e);
            std::process::exit(1)
        }
    }
}

fn handle_serve(matches: &ArgMatches) -> Result<()> {
    let model_path: &Path = required_path(matches, "model")?;
    let host = matches
        .get_one::<String>("host")
        .map(String::as_str)
        .unwrap_or("127.0.0.1");
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .with_context(|| format!("Invalid address {}:{}", host, port))?;

    let pipeline = load_pipeline(model_path)
        .with_context(|| format!("Failed to load model: {}", model_path.display()))?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run_server(pipeline, addr))
}
