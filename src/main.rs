use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;

use natural_capital::{
    config::RunLoader,
    engine::{EngineBuilder, EngineSettings},
    logging,
    output::ReportWriter,
};

#[derive(Debug, Parser)]
#[command(author, version, about = "Carbon stock valuation and scenario comparison")]
struct Cli {
    /// Path to the run YAML file
    #[arg(long, default_value = "scenarios/papua_buffer.yaml")]
    run: PathBuf,

    /// Directory for reports (uses the run file's setting when omitted)
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Only evaluate the named scenario; may be repeated
    #[arg(long = "scenario")]
    scenarios: Vec<String>,

    /// Override the carbon price
    #[arg(long)]
    price: Option<f64>,

    /// Override the annual discount rate
    #[arg(long)]
    discount_rate: Option<f64>,

    /// Override the sequestration horizon in years
    #[arg(long)]
    horizon_years: Option<u32>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let loader = RunLoader::new(".");
    let mut run = loader.load(&cli.run)?;
    logging::init(&run.logging.level)?;

    if let Some(price) = cli.price {
        run.valuation.price = price;
    }
    if let Some(rate) = cli.discount_rate {
        run.valuation.discount_rate = rate;
    }
    if let Some(years) = cli.horizon_years {
        run.valuation.horizon_years = Some(years);
    }

    let mut scenarios = run.scenarios.clone();
    if !cli.scenarios.is_empty() {
        if let Some(missing) = cli
            .scenarios
            .iter()
            .find(|name| !scenarios.iter().any(|s| &s.name == *name))
        {
            bail!("run '{}' has no scenario named '{missing}'", run.name);
        }
        scenarios.retain(|s| cli.scenarios.contains(&s.name));
    }

    let inputs = run.load_inputs()?;
    let output_dir = cli.output_dir.unwrap_or_else(|| run.output_dir());
    let mut writer = ReportWriter::new(&output_dir);
    if run.output.write_scenario_grids {
        writer = writer.with_scenario_grids(inputs.header.clone());
    }

    let settings = EngineSettings {
        run_name: run.name.clone(),
        valuation: run.valuation.clone(),
    };
    let engine = EngineBuilder::new(settings)
        .with_zones(inputs.zones)
        .with_scenarios(scenarios)
        .with_writer(writer)
        .build()?;

    let summary = engine.run(&inputs.baseline)?;
    for result in &summary.scenarios {
        for (zone, entry) in &result.report.zones {
            println!(
                "{} / {}: {:.2} Mg C -> {:.2} Mg C (delta {:+.2} Mg C, {:+.2} value)",
                result.outcome.scenario,
                zone,
                entry.baseline.total_carbon_mg,
                entry.scenario.total_carbon_mg,
                entry.delta_carbon_mg,
                entry.delta_value,
            );
        }
    }
    println!(
        "Run '{}' completed: {} scenario(s), reports in {}",
        summary.run_name,
        summary.scenarios.len(),
        output_dir.display()
    );
    Ok(())
}
