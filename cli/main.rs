#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::{Args, Parser, Subcommand};
use std::process;

use ifteq::data::{load_dataset, write_equations, write_predictions};
use ifteq::model::IftModel;
use ifteq::predict::{ColumnNaming, PredictOptions, build_equations, predict_with};

#[derive(Parser)]
#[command(
    name = "ifteq",
    about = "Turn fitted item-focused trees into item equations and predictions",
    long_about = "Compiles the split trees and coefficients of a fitted item-focused tree model \
                 into a closed-form logistic equation per item, and evaluates those equations \
                 over a tab-separated dataset."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate every item equation over a dataset
    #[command(about = "Predict item responses (outputs: predictions.tsv)")]
    Predict(PredictArgs),

    /// Print the equation of every item without evaluating it
    #[command(about = "Print item equations")]
    Equations(EquationsArgs),
}

#[derive(Args)]
struct PredictArgs {
    /// Path to a TSV file with the total-score column and every split variable
    data: String,

    /// Path to the fitted model file (.toml)
    #[arg(long)]
    model: String,

    /// Name of the total-score column
    #[arg(long, default_value = "score")]
    total_score: String,

    /// Where to write the input table with the derived columns appended
    #[arg(long, default_value = "predictions.tsv")]
    output: String,

    /// Also write the item equations to this file
    #[arg(long)]
    equations: Option<String>,

    /// Prefix of the linear-predictor columns
    #[arg(long, default_value = "n")]
    prefix_linear: String,

    /// Prefix of the probability columns
    #[arg(long, default_value = "p")]
    prefix_probability: String,

    /// Prefix of the binary prediction columns
    #[arg(long, default_value = "I")]
    prefix_class: String,
}

#[derive(Args)]
struct EquationsArgs {
    /// Path to the fitted model file (.toml)
    #[arg(long)]
    model: String,

    /// Name of the total-score column used in the rendered equations
    #[arg(long, default_value = "score")]
    total_score: String,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Predict(args) => predict_command(args),
        Commands::Equations(args) => equations_command(args),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn predict_command(args: PredictArgs) -> Result<(), Box<dyn std::error::Error>> {
    println!("Loading model from: {}", args.model);
    let model = IftModel::load(&args.model)?;
    let num_dif = model.items().iter().filter(|item| item.is_dif()).count();
    println!(
        "Model has {} items ({} with DIF trees)",
        model.num_items(),
        num_dif
    );

    let mut required = vec![args.total_score.as_str()];
    required.extend(model.split_variables());

    println!("Loading data from: {}", args.data);
    let loaded = load_dataset(&args.data, &required)?;
    println!("Loaded {} records", loaded.dataset.n_rows());

    let options = PredictOptions {
        total_score_column: args.total_score.clone(),
        naming: ColumnNaming {
            linear_predictor: args.prefix_linear,
            probability: args.prefix_probability,
            prediction: args.prefix_class,
        },
    };

    println!("Generating predictions...");
    let predictions = predict_with(&model, &loaded.dataset, &options)?;

    write_predictions(&args.output, &loaded.frame, &predictions)?;
    println!("Predictions saved to: {}", args.output);

    if let Some(path) = &args.equations {
        write_equations(path, &predictions)?;
        println!("Equations saved to: {}", path);
    }

    Ok(())
}

fn equations_command(args: EquationsArgs) -> Result<(), Box<dyn std::error::Error>> {
    let model = IftModel::load(&args.model)?;
    for equation in build_equations(&model, &args.total_score)? {
        println!("{}: {}", equation.label, equation.expression);
    }
    Ok(())
}
