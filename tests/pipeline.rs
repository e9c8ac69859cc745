use std::path::PathBuf;

use natural_capital::{
    config::{LoadedRun, RunConfig, RunLoader},
    engine::{EngineBuilder, EngineSettings},
    output::ReportWriter,
    report::Pricing,
    valuation::FlowAssumption,
};

fn run_loader() -> RunLoader {
    RunLoader::new(env!("CARGO_MANIFEST_DIR"))
}

fn run_path() -> PathBuf {
    PathBuf::from("scenarios/papua_buffer.yaml")
}

fn load() -> (RunConfig, LoadedRun) {
    let run = run_loader().load(run_path()).expect("run file parses");
    let inputs = run.load_inputs().expect("inputs load");
    (run, inputs)
}

fn build_engine(run: &RunConfig, inputs: &LoadedRun) -> EngineBuilder {
    let settings = EngineSettings {
        run_name: run.name.clone(),
        valuation: run.valuation.clone(),
    };
    EngineBuilder::new(settings)
        .with_zones(inputs.zones.clone())
        .with_scenarios(run.scenarios.clone())
}

#[test]
fn run_loader_reads_fixture() {
    let (run, inputs) = load();
    assert_eq!(run.name, "papua_buffer");
    assert_eq!(run.scenarios.len(), 3);
    assert_eq!(inputs.baseline.classes.cell_size_ha(), 1.0);
    assert_eq!(inputs.baseline.pools.len(), 4);
    assert_eq!(inputs.zones.get("mine").unwrap().cell_count(), 4);
    assert_eq!(inputs.zones.get("buffer").unwrap().cell_count(), 12);
    assert_eq!(inputs.zones.get("forest").unwrap().cell_count(), 26);
}

#[test]
fn baseline_totals_match_pool_table() {
    let (run, inputs) = load();
    let engine = build_engine(&run, &inputs).build().unwrap();
    let summary = engine.run(&inputs.baseline).unwrap();

    let landscape = &summary.baseline["landscape"];
    assert_eq!(landscape.cell_count, 34);
    assert_eq!(landscape.excluded_nodata_count, 2);
    assert_eq!(landscape.total_carbon_mg, 8574.0);
    assert_eq!(summary.baseline["buffer"].total_carbon_mg, 2634.0);
    assert_eq!(summary.baseline["mine"].total_carbon_mg, 20.0);
}

#[test]
fn buffer_restoration_gains_carbon() {
    let (run, inputs) = load();
    let engine = build_engine(&run, &inputs).build().unwrap();
    let summary = engine.run(&inputs.baseline).unwrap();

    let result = summary.scenario("buffer_restoration").expect("scenario evaluated");
    assert_eq!(result.outcome.changes[0].cells_changed, 5);
    let buffer = result.report.get("buffer").unwrap();
    assert_eq!(buffer.scenario.total_carbon_mg, 3480.0);
    assert_eq!(buffer.delta_carbon_mg, 846.0);
    assert!((buffer.delta_value - 846.0 * 3.67 * 40.0).abs() < 1e-6);
    assert_eq!(buffer.pricing, Pricing::Uniform);

    let landscape = result.report.get("landscape").unwrap();
    assert_eq!(landscape.delta_carbon_mg, 846.0);
    let mine = result.report.get("mine").unwrap();
    assert_eq!(mine.delta_carbon_mg, 0.0);

    let seq = buffer.sequestration.as_ref().expect("horizon configured");
    assert_eq!(seq.assumption, FlowAssumption::Linear);
    assert_eq!(seq.horizon_years, 30);
    assert!(seq.present_value > 0.0);
    assert!(seq.present_value < buffer.delta_value);
}

#[test]
fn chained_rules_and_expansion_signs() {
    let (run, inputs) = load();
    let engine = build_engine(&run, &inputs).build().unwrap();
    let summary = engine.run(&inputs.baseline).unwrap();

    let reclaimed = summary.scenario("mine_reclamation").unwrap();
    assert_eq!(reclaimed.outcome.grid.get(3, 2), Some(2));
    assert_eq!(reclaimed.outcome.changes[0].cells_changed, 4);
    assert_eq!(reclaimed.outcome.changes[1].cells_changed, 4);
    assert_eq!(reclaimed.report.get("mine").unwrap().delta_carbon_mg, 1140.0);

    let expansion = summary.scenario("mine_expansion").unwrap();
    let buffer = expansion.report.get("buffer").unwrap();
    assert_eq!(buffer.delta_carbon_mg, 12.0 * 5.0 - 2634.0);
    assert!(buffer.delta_value < 0.0);
    assert!(buffer.sequestration.as_ref().unwrap().present_value < 0.0);

    assert_eq!(inputs.baseline.classes.get(3, 2), Some(7));
}

#[test]
fn writer_emits_reports_and_grids() {
    let (run, inputs) = load();
    let temp_dir = tempfile::tempdir().unwrap();
    let writer = ReportWriter::new(temp_dir.path()).with_scenario_grids(inputs.header.clone());
    let engine = build_engine(&run, &inputs).with_writer(writer).build().unwrap();
    let summary = engine.run(&inputs.baseline).unwrap();

    let run_dir = temp_dir.path().join("papua_buffer");
    assert!(run_dir.join("baseline.json").exists());
    let files = summary
        .scenario("buffer_restoration")
        .and_then(|r| r.files.clone())
        .expect("files written");
    assert_eq!(files.json, run_dir.join("buffer_restoration.json"));

    let json = std::fs::read_to_string(&files.json).unwrap();
    assert!(
        json.contains("\"scenario\": \"buffer_restoration\""),
        "report should name its scenario"
    );
    let csv = std::fs::read_to_string(&files.csv).unwrap();
    assert_eq!(csv.lines().count(), 5);

    let grid_path = files.grid.expect("scenario grid written");
    let (_, grid) = natural_capital::ascii::read_class_grid(&grid_path, None).unwrap();
    assert_eq!(grid.get(2, 2), Some(2));
    assert_eq!(grid.get(2, 5), Some(0));
}

#[test]
fn duplicate_scenarios_rejected() {
    let (run, inputs) = load();
    let again = run.scenarios[0].clone();
    let result = build_engine(&run, &inputs).with_scenario(again).build();
    assert!(result.is_err());
}

#[test]
fn scenario_with_unpooled_class_fails_before_output() {
    use natural_capital::{scenario::ReassignmentRule, CarbonError, Scenario};

    let (run, inputs) = load();
    let temp_dir = tempfile::tempdir().unwrap();
    let bad = Scenario::new("unpooled").with_rule(ReassignmentRule::all("mine", 99));
    let engine = build_engine(&run, &inputs)
        .with_scenario(bad)
        .with_writer(ReportWriter::new(temp_dir.path()))
        .build()
        .unwrap();

    match engine.run(&inputs.baseline) {
        Err(CarbonError::UnknownClass { code, cells }) => {
            assert_eq!(code, 99);
            assert_eq!(cells, 4);
        }
        other => panic!("expected unknown class, got {other:?}"),
    }
    assert!(!temp_dir.path().join("papua_buffer").exists());
}
