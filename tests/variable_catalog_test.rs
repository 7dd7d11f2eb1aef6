//! Variable catalog: statistics, correlation and related-phenotype exclusions

mod common;

use arrow::array::{Array, Float64Array, StringArray};
use common::samples;
use phewas_engine::phenotype::{
    summarize_exclusions, PhenotypeSource, PhenotypeTable, RelatedPhenotypesExclusion, Variable,
    VariableCatalog, VariableKind,
};
use phewas_engine::storage::column;
use phewas_engine::Error;

// phi(a, b) = 12 / sqrt(240) ~ 0.775, phi(a, c) ~ 0.258, phi(b, c) = 0
fn related_cohort() -> PhenotypeTable {
    PhenotypeTable::new(
        samples(8),
        vec![
            ("a".to_string(), vec![0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0]),
            ("b".to_string(), vec![1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0]),
            ("c".to_string(), vec![0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0]),
            ("bmi".to_string(), vec![20.0, 22.0, 24.0, 26.0, 28.0, 30.0, 32.0, 34.0]),
            ("sex".to_string(), vec![0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0]),
        ],
    )
    .unwrap()
}

fn variables() -> Vec<Variable> {
    vec![
        Variable::discrete("a"),
        Variable::discrete("b"),
        Variable::discrete("c"),
        Variable::continuous("bmi"),
        // perfectly correlated with c, but covariates are never excluded
        Variable::discrete("sex").covariate(),
    ]
}

#[test]
fn test_controls_of_a_that_are_cases_of_b_become_missing() {
    let mut source = related_cohort();
    let mut catalog = VariableCatalog::initialize(variables(), &source).unwrap();
    let correlation = catalog.compute_correlation(&source).unwrap();
    let phi = correlation.get("a", "b").unwrap();
    assert!((phi - 12.0 / 240f64.sqrt()).abs() < 1e-12);

    let records = catalog
        .apply_related_exclusions(&mut source, &correlation, 0.7)
        .unwrap()
        .to_vec();

    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.phen1 != "c" && r.phen2 != "c"));
    assert!(records.iter().all(|r| r.phen1 != "sex" && r.phen2 != "sex"));

    let a_b = records.iter().find(|r| r.phen1 == "a").unwrap();
    assert_eq!(a_b.phen2, "b");
    assert_eq!(a_b.n_excluded, 1);
    assert!((a_b.correlation - phi).abs() < 1e-12);

    // b has no controls among the cases of a
    let b_a = records.iter().find(|r| r.phen1 == "b").unwrap();
    assert_eq!(b_a.n_excluded, 0);

    let a = source.raw_vector("a").unwrap();
    assert!(a[0].is_nan());
    assert_eq!(a.iter().filter(|v| v.is_nan()).count(), 1);
    assert_eq!(source.raw_vector("b").unwrap()[0], 1.0);
}

#[test]
fn test_statistics_describe_the_data_before_exclusion() {
    let mut source = related_cohort();
    let mut catalog = VariableCatalog::initialize(variables(), &source).unwrap();
    let correlation = catalog.compute_correlation(&source).unwrap();
    catalog.apply_related_exclusions(&mut source, &correlation, 0.7).unwrap();

    let a = catalog.get("a").unwrap();
    assert_eq!(a.n_missing, Some(0));
    assert!(matches!(
        a.kind,
        VariableKind::Discrete {
            n_cases: Some(3),
            n_controls: Some(5)
        }
    ));
    assert!((a.prevalence().unwrap() - 0.375).abs() < 1e-12);
}

#[test]
fn test_threshold_above_every_correlation_records_nothing() {
    let mut source = related_cohort();
    let mut catalog = VariableCatalog::initialize(variables(), &source).unwrap();
    assert!(catalog.exclusions().is_none());

    let correlation = catalog.compute_correlation(&source).unwrap();
    let records = catalog.apply_related_exclusions(&mut source, &correlation, 0.95).unwrap();
    assert!(records.is_empty());
    assert_eq!(catalog.exclusions(), Some(&[][..]));
    assert!(source.raw_vector("a").unwrap().iter().all(|v| v.is_finite()));

    let err = catalog
        .apply_related_exclusions(&mut source, &correlation, 0.1)
        .unwrap_err();
    assert!(matches!(err, Error::ExclusionsAlreadyComputed));
}

#[test]
fn test_correlation_spans_every_variable() {
    let source = related_cohort();
    let catalog = VariableCatalog::initialize(variables(), &source).unwrap();
    let correlation = catalog.compute_correlation(&source).unwrap();
    assert_eq!(correlation.names, vec!["a", "b", "c", "bmi", "sex"]);
    assert!((correlation.get("c", "sex").unwrap() - 1.0).abs() < 1e-12);
    assert_eq!(correlation.get("sex", "c"), correlation.get("c", "sex"));
    assert!(correlation.get("a", "sex").is_some());
    assert_eq!(correlation.get("bmi", "bmi"), Some(1.0));
    assert!(correlation.get("b", "c").unwrap().abs() < 1e-12);

    let json = serde_json::to_string(&correlation).unwrap();
    let back: phewas_engine::phenotype::CorrelationMatrix = serde_json::from_str(&json).unwrap();
    assert_eq!(back.names, correlation.names);
    assert!((back.get("a", "b").unwrap() - correlation.get("a", "b").unwrap()).abs() < 1e-12);
}

#[test]
fn test_exclusions_skip_pairs_involving_a_covariate() {
    // only c ~ sex reaches the threshold, and sex is a covariate
    let mut source = related_cohort();
    let mut catalog = VariableCatalog::initialize(variables(), &source).unwrap();
    let correlation = catalog.compute_correlation(&source).unwrap();
    assert!(correlation.get("c", "sex").unwrap() >= 0.9);
    assert!(correlation.get("a", "b").unwrap() < 0.9);

    let records = catalog.apply_related_exclusions(&mut source, &correlation, 0.9).unwrap();
    assert!(records.is_empty());
    assert!(source.raw_vector("c").unwrap().iter().all(|v| v.is_finite()));
    assert!(source.raw_vector("sex").unwrap().iter().all(|v| v.is_finite()));
}

#[test]
fn test_outcome_and_covariate_split() {
    let source = related_cohort();
    let catalog = VariableCatalog::initialize(variables(), &source).unwrap();
    assert_eq!(catalog.len(), 5);
    assert_eq!(catalog.outcome_names(), vec!["a", "b", "c", "bmi"]);
    let covariates: Vec<&str> = catalog.covariates().map(|v| v.name.as_str()).collect();
    assert_eq!(covariates, vec!["sex"]);
    assert!(matches!(catalog.get("height"), Err(Error::Lookup { .. })));
}

#[test]
fn test_variables_load_from_json_configuration() {
    let list: Vec<Variable> = serde_json::from_str(
        r#"[
            {"name": "a", "variable_type": "discrete"},
            {"name": "bmi", "variable_type": "continuous", "transformation": "inverse-normal-transform"},
            {"name": "sex", "variable_type": "discrete", "is_covariate": true}
        ]"#,
    )
    .unwrap();
    assert_eq!(list[1].transformation().map(|t| t.name()), Some("inverse-normal-transform"));
    assert!(list[2].is_covariate);

    let discrete_with_transform = serde_json::from_str::<Variable>(
        r#"{"name": "a", "variable_type": "discrete", "transformation": "log"}"#,
    );
    assert!(discrete_with_transform.is_err());
}

#[test]
fn test_variables_table_carries_statistics() {
    let source = related_cohort();
    let catalog = VariableCatalog::initialize(variables(), &source).unwrap();
    let batch = catalog.to_table().unwrap().concat().unwrap();
    assert_eq!(batch.num_rows(), 5);

    let names = column::<StringArray>(&batch, "name").unwrap();
    let prevalence = column::<Float64Array>(&batch, "prevalence").unwrap();
    let mean = column::<Float64Array>(&batch, "mean").unwrap();
    assert_eq!(names.value(3), "bmi");
    assert!((mean.value(3) - 27.0).abs() < 1e-12);
    assert!(prevalence.is_null(3));
    assert!((prevalence.value(0) - 0.375).abs() < 1e-12);
}

#[test]
fn test_summary_of_exclusions() {
    let records = vec![
        RelatedPhenotypesExclusion {
            phen1: "a".into(),
            phen2: "b".into(),
            correlation: 0.8,
            n_excluded: 4,
        },
        RelatedPhenotypesExclusion {
            phen1: "a".into(),
            phen2: "c".into(),
            correlation: -0.75,
            n_excluded: 1,
        },
    ];
    let summary = summarize_exclusions(&records);
    assert_eq!(summary.len(), 1);
    assert_eq!(summary["a"].excluded, 5);
}
