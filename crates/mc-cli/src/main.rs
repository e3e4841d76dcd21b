//! minuit-compat CLI
//!
//! Drives the legacy command surface end to end: load a data container,
//! attach a built-in model, run a legacy command script, print the
//! projected fit report as JSON.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use mc_compat::{CompatFitter, FitData};
use mc_core::ModelFunction;
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "mc")]
#[command(about = "minuit-compat - legacy command-driven fitting")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit a data container with a built-in model via legacy commands
    Fit {
        /// Input data container (JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Model name: line, parabola, gauss, expo, plane
        #[arg(short, long)]
        model: String,

        /// Initial parameter values, comma separated
        #[arg(long)]
        init: String,

        /// Initial step sizes, comma separated (default 0.1 each; a step
        /// of 0 fixes the parameter)
        #[arg(long)]
        steps: Option<String>,

        /// Legacy command script, commands separated by ';'
        /// (e.g. "SET PRINT 0; MIGRAD 500 1e-7; HESSE")
        #[arg(long, default_value = "MIGRAD")]
        commands: String,

        /// Output file for the fit report (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write a confidence-band container (JSON) to this path
        #[arg(long)]
        band: Option<PathBuf>,

        /// Confidence level for the band
        #[arg(long, default_value = "0.95")]
        cl: f64,
    },
}

#[derive(Serialize)]
struct CommandStatus {
    command: String,
    status: i32,
}

#[derive(Serialize)]
struct FitReport {
    model: String,
    parameter_names: Vec<String>,
    bestfit: Vec<f64>,
    uncertainties: Vec<f64>,
    minus_errors: Vec<f64>,
    plus_errors: Vec<f64>,
    min_fcn_value: f64,
    edm: f64,
    n_free: usize,
    n_total: usize,
    covariance: Vec<f64>,
    commands: Vec<CommandStatus>,
}

/// Built-in models keyed by name. Returns the model and its parameter
/// names.
fn make_model(name: &str) -> Result<(Box<dyn ModelFunction>, Vec<&'static str>)> {
    let (model, names): (Box<dyn ModelFunction>, Vec<&'static str>) = match name {
        "line" => (
            Box::new((1usize, 2usize, |x: &[f64], p: &[f64]| p[0] + p[1] * x[0])),
            vec!["offset", "slope"],
        ),
        "parabola" => (
            Box::new((1usize, 3usize, |x: &[f64], p: &[f64]| {
                p[0] + p[1] * x[0] + p[2] * x[0] * x[0]
            })),
            vec!["c0", "c1", "c2"],
        ),
        "gauss" => (
            Box::new((1usize, 3usize, |x: &[f64], p: &[f64]| {
                let z = (x[0] - p[1]) / p[2];
                p[0] * (-0.5 * z * z).exp()
            })),
            vec!["amp", "mean", "sigma"],
        ),
        "expo" => (
            Box::new((1usize, 2usize, |x: &[f64], p: &[f64]| p[0] * (p[1] * x[0]).exp())),
            vec!["norm", "slope"],
        ),
        "plane" => (
            Box::new((2usize, 3usize, |x: &[f64], p: &[f64]| p[0] + p[1] * x[0] + p[2] * x[1])),
            vec!["offset", "dx", "dy"],
        ),
        other => bail!("unknown model {other:?} (expected line, parabola, gauss, expo, plane)"),
    };
    Ok((model, names))
}

fn parse_floats(list: &str, what: &str) -> Result<Vec<f64>> {
    list.split(',')
        .map(|t| t.trim().parse::<f64>().with_context(|| format!("invalid {what} value {t:?}")))
        .collect()
}

/// Split a command script into (command text, numeric args) pairs: the
/// leading non-numeric tokens form the command, the rest its arguments.
fn parse_script(script: &str) -> Result<Vec<(String, Vec<f64>)>> {
    let mut out = Vec::new();
    for chunk in script.split(';') {
        let chunk = chunk.trim();
        if chunk.is_empty() {
            continue;
        }
        let mut words = Vec::new();
        let mut args = Vec::new();
        for token in chunk.split_whitespace() {
            if args.is_empty() && token.parse::<f64>().is_err() {
                words.push(token);
            } else {
                args.push(
                    token
                        .parse::<f64>()
                        .with_context(|| format!("invalid command argument {token:?}"))?,
                );
            }
        }
        if words.is_empty() {
            bail!("command {chunk:?} has no command name");
        }
        out.push((words.join(" "), args));
    }
    Ok(out)
}

/// Chi-square objective against the container's values and errors;
/// zero-error points fall back to unit weight.
fn chi2_callback(
    data: &FitData,
    model_name: &str,
) -> Result<mc_compat::LegacyFcnCallback> {
    let (model, _) = make_model(model_name)?;
    let points = data.points();
    let values = data.values().to_vec();
    let errors = data.value_errors().to_vec();

    Ok(Box::new(move |_npar, _grad, fval, params, _flag| {
        *fval = points
            .iter()
            .zip(values.iter().zip(errors.iter()))
            .map(|(x, (&y, &e))| {
                let sigma = if e > 0.0 { e } else { 1.0 };
                let r = (y - model.eval(x, params)) / sigma;
                r * r
            })
            .sum();
    }))
}

fn write_json<T: Serialize>(value: &T, output: Option<&Path>) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    match output {
        Some(path) => std::fs::write(path, text)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => println!("{text}"),
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_fit(
    input: &Path,
    model_name: &str,
    init: &str,
    steps: Option<&str>,
    commands: &str,
    output: Option<&Path>,
    band: Option<&Path>,
    cl: f64,
) -> Result<()> {
    let text = std::fs::read_to_string(input)
        .with_context(|| format!("failed to read {}", input.display()))?;
    let data: FitData = serde_json::from_str(&text).context("invalid data container")?;
    data.validate().map_err(|e| anyhow::anyhow!("{e}"))?;

    let (model, names) = make_model(model_name)?;
    if model.ndim() != data.dimension() {
        bail!(
            "model {model_name:?} is {}-dimensional but the data is {}-dimensional",
            model.ndim(),
            data.dimension()
        );
    }

    let init_values = parse_floats(init, "init")?;
    if init_values.len() != model.n_params() {
        bail!("model {model_name:?} takes {} parameters, got {}", model.n_params(), init_values.len());
    }
    let step_values = match steps {
        Some(s) => parse_floats(s, "step")?,
        None => vec![0.1; init_values.len()],
    };
    if step_values.len() != init_values.len() {
        bail!("expected {} step sizes, got {}", init_values.len(), step_values.len());
    }

    let mut fitter = CompatFitter::new();
    for (i, (&v, &s)) in init_values.iter().zip(step_values.iter()).enumerate() {
        fitter
            .set_parameter(i, names[i], v, s, 0.0, 0.0)
            .map_err(|e| anyhow::anyhow!("{e}"))?;
    }
    fitter.set_fcn(chi2_callback(&data, model_name)?);
    fitter.set_model(model);
    let band_template = data.band_target();
    fitter.set_fit_data(data).map_err(|e| anyhow::anyhow!("{e}"))?;

    let mut statuses = Vec::new();
    for (cmd, args) in parse_script(commands)? {
        let status = fitter.execute_command_status(&cmd, &args);
        if status != 0 {
            tracing::warn!("command {cmd:?} failed with status {status}");
        }
        statuses.push(CommandStatus { command: cmd, status });
    }

    let n = fitter.n_parameters();
    let mut bestfit = Vec::with_capacity(n);
    let mut uncertainties = Vec::with_capacity(n);
    let mut minus_errors = Vec::with_capacity(n);
    let mut plus_errors = Vec::with_capacity(n);
    for i in 0..n {
        let info = fitter.get_parameter_info(i).map_err(|e| anyhow::anyhow!("{e}"))?;
        bestfit.push(info.value);
        uncertainties.push(info.error);
        minus_errors.push(info.lower);
        plus_errors.push(info.upper);
    }
    let stats = fitter.get_stats();
    let covariance = fitter.covariance_matrix().map(|c| c.to_vec()).unwrap_or_default();

    let report = FitReport {
        model: model_name.to_string(),
        parameter_names: names.iter().map(|s| s.to_string()).collect(),
        bestfit,
        uncertainties,
        minus_errors,
        plus_errors,
        min_fcn_value: stats.min_fcn_value,
        edm: stats.edm,
        n_free: stats.n_free,
        n_total: stats.n_total,
        covariance,
        commands: statuses,
    };
    write_json(&report, output)?;

    if let Some(band_path) = band {
        let mut target = band_template;
        fitter.compute_intervals(&mut target, cl).map_err(|e| anyhow::anyhow!("{e}"))?;
        write_json(&target, Some(band_path))?;
    }

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt().with_max_level(cli.log_level).init();

    match &cli.command {
        Commands::Fit { input, model, init, steps, commands, output, band, cl } => run_fit(
            input,
            model,
            init,
            steps.as_deref(),
            commands,
            output.as_deref(),
            band.as_deref(),
            *cl,
        ),
    }
}
