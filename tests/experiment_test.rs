//! End-to-end runs: run directory layout, persisted artifacts and reopening

mod common;

use arrow::array::{Array, Float64Array, StringArray};
use common::{cohort, raw, samples, Cohort, RowCountProvider};
use phewas_engine::experiment::{
    Experiment, ExperimentConfig, ExperimentInfo, ResultStore, RunStatus, EXPERIMENT_INFO_FILE,
    PHENOTYPES_TABLE, PHEN_CORRELATION_FILE, RESULTS_TABLE,
};
use phewas_engine::genotype::{GenotypeDatabase, MemoryGenotypes, VariantCatalog, VARIANTS_TABLE};
use phewas_engine::phenotype::{
    CorrelationMatrix, PhenotypeSource, PhenotypeTable, RelatedPhenotypesExclusion, Transformation, Variable,
    EXCLUSIONS_TABLE, VARIABLES_TABLE,
};
use phewas_engine::stats::regression_factory;
use phewas_engine::storage::{column, StorageEngine};
use phewas_engine::tasks::{LinearTest, LogisticTest, Task, TaskConfig, TASK_META_FILE};
use phewas_engine::{Error, ErrorKind};
use serde_json::Value;
use tempfile::TempDir;

const N_SAMPLES: usize = 40;
const N_VARIANTS: usize = 4;

fn variables() -> Vec<Variable> {
    vec![
        Variable::discrete("asthma"),
        Variable::discrete("copd"),
        Variable::continuous("height").with_transformation(Transformation::InverseNormal),
        Variable::continuous("age").covariate(),
        Variable::discrete("sex").covariate(),
    ]
}

fn logistic() -> Box<dyn Task> {
    Box::new(LogisticTest::new(TaskConfig::default(), regression_factory(|| RowCountProvider)).unwrap())
}

fn linear() -> Box<dyn Task> {
    Box::new(LinearTest::new(TaskConfig::default(), regression_factory(|| RowCountProvider)).unwrap())
}

fn build(config: ExperimentConfig, c: Cohort, tasks: Vec<Box<dyn Task>>) -> phewas_engine::Result<Experiment> {
    Experiment::new(
        config,
        Box::new(c.phenotypes),
        GenotypeDatabase::new(Box::new(c.genotypes)),
        variables(),
        tasks,
    )
}

#[test]
fn test_full_run_writes_every_artifact() {
    phewas_engine::logging::init_for_tests();
    let out = TempDir::new().unwrap();
    let config = ExperimentConfig::new("run1")
        .with_output_dir(out.path())
        .with_n_workers(2);
    let mut experiment = build(config, cohort(1, N_SAMPLES, N_VARIANTS), vec![logistic(), linear()]).unwrap();

    // metadata is only written at the end
    let root = experiment.root().to_path_buf();
    assert_eq!(root, out.path().join("run1"));
    assert!(!root.join(EXPERIMENT_INFO_FILE).exists());

    let info = experiment.run_tasks().unwrap().clone();
    assert_eq!(info.status(), RunStatus::Completed);
    assert_eq!(info.tasks(), ["task0_logistic", "task1_linear"]);
    assert_eq!(info.outcomes(), ["asthma", "copd", "height"]);
    assert_eq!(info.n_workers(), 2);
    assert_eq!(info.phen_correlation(), Some(PHEN_CORRELATION_FILE));
    assert!(info.walltime().is_some());
    assert!(info.end_time().is_some());

    for table in [VARIANTS_TABLE, VARIABLES_TABLE, PHENOTYPES_TABLE, RESULTS_TABLE] {
        assert!(experiment.engine().has_table(table), "{table} missing");
    }
    assert!(!experiment.engine().has_table(EXCLUSIONS_TABLE));
    assert!(root.join(PHEN_CORRELATION_FILE).is_file());
    assert!(root.join("task0_logistic").join(TASK_META_FILE).is_file());
    assert!(root.join("task1_linear").join(TASK_META_FILE).is_file());

    // 2 discrete outcomes + 1 continuous, each against every variant
    assert_eq!(experiment.context().results().len(), 3 * N_VARIANTS);
}

#[test]
fn test_experiment_info_json_keys() {
    let out = TempDir::new().unwrap();
    let config = ExperimentConfig::new("meta").with_output_dir(out.path()).with_build("GRCh38");
    let mut experiment = build(config, cohort(2, N_SAMPLES, 2), vec![logistic()]).unwrap();
    experiment.run_tasks().unwrap();

    let raw: Value =
        serde_json::from_str(&std::fs::read_to_string(experiment.root().join(EXPERIMENT_INFO_FILE)).unwrap())
            .unwrap();
    for key in ["name", "engine_url", "start_time", "end_time", "walltime", "build", "status", "tasks"] {
        assert!(raw.get(key).is_some(), "{key} missing from experiment_info.json");
    }
    assert_eq!(raw["name"], Value::from("meta"));
    assert_eq!(raw["build"], Value::from("GRCh38"));
    assert_eq!(raw["status"], Value::from("completed"));
    assert!(raw["engine_url"].as_str().unwrap().starts_with("parquet://"));
    let walltime = raw["walltime"].as_str().unwrap();
    assert_eq!(walltime.len(), 8);
    assert_eq!(walltime.matches(':').count(), 2);
}

#[test]
fn test_existing_run_directory_is_refused() {
    let out = TempDir::new().unwrap();
    std::fs::create_dir(out.path().join("taken")).unwrap();
    let config = ExperimentConfig::new("taken").with_output_dir(out.path());
    let err = build(config, cohort(3, 10, 1), vec![]).unwrap_err();
    assert!(matches!(err, Error::RunDirectoryExists(ref p) if p.ends_with("taken")));
    assert_eq!(err.kind(), ErrorKind::Storage);
}

#[test]
fn test_tasks_run_once() {
    let out = TempDir::new().unwrap();
    let config = ExperimentConfig::new("once").with_output_dir(out.path());
    let mut experiment = build(config, cohort(4, 20, 2), vec![logistic()]).unwrap();
    experiment.run_tasks().unwrap();
    let err = experiment.run_tasks().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(experiment.context().results().len(), 2 * 2);
}

#[test]
fn test_results_and_metadata_can_be_reopened() {
    let out = TempDir::new().unwrap();
    let config = ExperimentConfig::new("reopen").with_output_dir(out.path());
    let mut experiment = build(config, cohort(5, N_SAMPLES, N_VARIANTS), vec![logistic(), linear()]).unwrap();
    experiment.run_tasks().unwrap();
    let root = experiment.root().to_path_buf();
    let (info, variables, written) = experiment.into_results();
    assert_eq!(variables.len(), 5);

    let loaded = ExperimentInfo::load(&root).unwrap();
    assert_eq!(loaded.name(), info.name());
    assert_eq!(loaded.tasks(), info.tasks());
    assert_eq!(loaded.status(), RunStatus::Completed);
    assert_eq!(loaded.walltime(), info.walltime());

    let engine = StorageEngine::open(&root).unwrap();
    let store = ResultStore::open(engine.clone()).unwrap();
    assert_eq!(store.len(), written.len());
    assert_eq!(store.task_names().unwrap(), vec!["task0_logistic", "task1_linear"]);

    let logistic_rows = store.query("%logistic", None).unwrap();
    assert_eq!(logistic_rows.len(), 2 * N_VARIANTS);
    assert!(logistic_rows.iter().all(|r| r.results_type() == "LogisticTest"));
    let linear_rows = store.query("task1_%", Some(1.0)).unwrap();
    assert_eq!(linear_rows.len(), N_VARIANTS);
    assert!(linear_rows.iter().all(|r| r.results_type() == "LinearTest"));

    let top = store.top_hits(3).unwrap();
    assert_eq!(top.num_rows(), 3);

    let catalog = VariantCatalog::from_table(engine.read_table(VARIANTS_TABLE).unwrap()).unwrap();
    assert_eq!(catalog.len(), N_VARIANTS);
    assert!(catalog.get("rs0").is_ok());

    let correlation: CorrelationMatrix = engine.read_json(PHEN_CORRELATION_FILE).unwrap();
    assert_eq!(correlation.names, vec!["asthma", "copd", "height", "age", "sex"]);
    assert_eq!(correlation.get("sex", "sex"), Some(1.0));
}

#[test]
fn test_related_phenotype_exclusions_are_persisted() {
    let out = TempDir::new().unwrap();
    let mut c = cohort(6, N_SAMPLES, 2);
    c.phenotypes.exclude_correlated(0.0).unwrap();
    let config = ExperimentConfig::new("excl").with_output_dir(out.path());
    let mut experiment = build(config, c, vec![logistic()]).unwrap();

    let records = experiment.context().variables().exclusions().unwrap().to_vec();
    assert_eq!(records.len(), 2);
    experiment.run_tasks().unwrap();
    assert_eq!(experiment.info().phenotype_correlation_for_exclusion(), Some(0.0));

    let engine = experiment.engine();
    let stored = RelatedPhenotypesExclusion::from_table(&engine.read_table(EXCLUSIONS_TABLE).unwrap()).unwrap();
    assert_eq!(stored.len(), 2);

    // asthma controls that are copd cases are missing in the analysed table
    let asthma_copd = records.iter().find(|r| r.phen1 == "asthma").unwrap();
    let batch = engine.read_table(PHENOTYPES_TABLE).unwrap().concat().unwrap();
    let asthma = column::<Float64Array>(&batch, "asthma").unwrap();
    assert_eq!(asthma.null_count() as u64, asthma_copd.n_excluded);
}

#[test]
fn test_configuration_artifact_is_copied() {
    let out = TempDir::new().unwrap();
    let artifact = out.path().join("phewas.json");
    std::fs::write(&artifact, r#"{"name": "copied"}"#).unwrap();

    let config = ExperimentConfig::new("copied")
        .with_output_dir(out.path())
        .with_configuration(&artifact);
    let mut experiment = build(config, cohort(7, 20, 1), vec![logistic()]).unwrap();
    let info = experiment.run_tasks().unwrap();
    let copied = info.configuration().unwrap().to_path_buf();
    assert_eq!(copied, out.path().join("copied").join("phewas.json"));
    assert_eq!(std::fs::read_to_string(copied).unwrap(), r#"{"name": "copied"}"#);
}

#[test]
fn test_missing_configuration_artifact_only_warns() {
    let out = TempDir::new().unwrap();
    let config = ExperimentConfig::new("nocopy")
        .with_output_dir(out.path())
        .with_configuration(out.path().join("does_not_exist.json"));
    let mut experiment = build(config, cohort(8, 20, 1), vec![logistic()]).unwrap();
    let info = experiment.run_tasks().unwrap();
    assert_eq!(info.status(), RunStatus::Completed);
    assert!(info.configuration().is_none());
}

#[test]
fn test_phenotypes_follow_the_genotype_sample_subset() {
    let out = TempDir::new().unwrap();
    let mut c = cohort(9, 12, 2);
    // genotypes only cover every other sample, in reverse order
    let kept: Vec<String> = c.samples.iter().rev().step_by(2).cloned().collect();
    let mut genotypes = MemoryGenotypes::new(kept.clone(), false);
    genotypes.push(raw("rs0", vec![0.0, 1.0, 2.0, 1.0, 0.0, 1.0])).unwrap();
    c.genotypes = genotypes;

    let config = ExperimentConfig::new("subset").with_output_dir(out.path());
    let experiment = build(config, c, vec![]).unwrap();
    assert_eq!(experiment.context().phenotypes().sample_order(), kept.as_slice());

    let batch = experiment.engine().read_table(PHENOTYPES_TABLE).unwrap().concat().unwrap();
    let stored = column::<StringArray>(&batch, "sample").unwrap();
    let stored: Vec<&str> = stored.iter().map(Option::unwrap).collect();
    assert_eq!(stored, kept);
}

#[test]
fn test_genotype_samples_missing_from_phenotypes_fail() {
    let out = TempDir::new().unwrap();
    let mut c = cohort(10, 6, 1);
    let mut ids = samples(6);
    ids.push("stranger".to_string());
    c.genotypes = MemoryGenotypes::new(ids, false).with_variants(vec![raw("rs0", vec![0.0; 7])]).unwrap();

    let config = ExperimentConfig::new("extra").with_output_dir(out.path());
    let err = build(config, c, vec![]).unwrap_err();
    assert!(matches!(err, Error::ExtraSamples(ref s) if s.contains("stranger")));
}

#[test]
fn test_invalid_names_are_rejected_before_touching_disk() {
    let out = TempDir::new().unwrap();
    for name in ["", "a/b"] {
        let config = ExperimentConfig::new(name).with_output_dir(out.path());
        let err = build(config, cohort(11, 6, 1), vec![]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
    assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
}

#[test]
fn test_unknown_variable_fails_construction() {
    let out = TempDir::new().unwrap();
    let c = cohort(12, 6, 1);
    let err = Experiment::new(
        ExperimentConfig::new("lookup").with_output_dir(out.path()),
        Box::new(c.phenotypes) as Box<dyn PhenotypeSource>,
        GenotypeDatabase::new(Box::new(c.genotypes)),
        vec![Variable::discrete("bmi")],
        vec![],
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Lookup);
}

#[test]
fn test_phenotype_table_from_file_drives_a_run() {
    let out = TempDir::new().unwrap();
    let path = out.path().join("phen.tsv");
    let mut content = String::from("sample\tasthma\tage\n");
    for (i, s) in samples(8).iter().enumerate() {
        content.push_str(&format!("{s}\t{}\t{}\n", i % 2, 30 + i));
    }
    std::fs::write(&path, content).unwrap();
    let phenotypes = PhenotypeTable::from_delimited(&path, "sample", &[]).unwrap();
    let genotypes = MemoryGenotypes::new(samples(8), false)
        .with_variants(vec![raw("rs0", vec![0.0, 1.0, 2.0, 1.0, 0.0, 1.0, 2.0, 1.0])]).unwrap();

    let mut experiment = Experiment::new(
        ExperimentConfig::new("file").with_output_dir(out.path()),
        Box::new(phenotypes),
        GenotypeDatabase::new(Box::new(genotypes)),
        vec![Variable::discrete("asthma"), Variable::continuous("age").covariate()],
        vec![logistic()],
    )
    .unwrap();
    experiment.run_tasks().unwrap();
    let rows = experiment.context().results().results().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].header.coefficient, Some(8.0));
}
