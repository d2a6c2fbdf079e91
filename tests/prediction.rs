use approx::assert_abs_diff_eq;
use ifteq::dataset::Dataset;
use ifteq::model::{IftModel, LeafCoefficient, ModelError, ModelTables, NoDifOffset, SplitRecord};
use ifteq::predict::{PredictError, logistic, predict};
use ifteq::tree::TreeError;
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_data(rows: usize, seed: u64) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let score: Array1<f64> = (0..rows).map(|_| rng.gen_range(0..=20) as f64).collect();
    let age: Array1<f64> = (0..rows).map(|_| rng.gen_range(15.0..70.0)).collect();
    let sex: Array1<f64> = (0..rows).map(|_| rng.gen_range(0..=1) as f64).collect();
    Dataset::from_columns([("score", score), ("age", age), ("sex", sex)]).unwrap()
}

fn split(item: usize, number: u32, left: u32, right: u32, variable: &str, threshold: f64) -> SplitRecord {
    SplitRecord {
        item,
        number,
        left: Some(left),
        right: Some(right),
        variable: variable.to_string(),
        threshold,
    }
}

fn leaf(item: usize, node: u32, coefficient: f64) -> LeafCoefficient {
    LeafCoefficient {
        item,
        node,
        coefficient,
    }
}

/// Item 1: single age split. Item 2: no DIF. Item 3: age split, then sex on the right.
fn mixed_model() -> IftModel {
    IftModel::new(ModelTables {
        slopes: vec![0.3, -0.1, 0.25],
        item_labels: Some(vec!["q1".into(), "q2".into(), "q3".into()]),
        dif_leaves: vec![
            leaf(1, 2, 0.5),
            leaf(1, 3, -0.3),
            leaf(3, 2, -1.0),
            leaf(3, 4, 0.4),
            leaf(3, 5, -2.2),
        ],
        no_dif_offsets: vec![NoDifOffset {
            item: 2,
            offset: 0.7,
        }],
        splits: vec![
            split(3, 3, 4, 5, "sex", 0.0),
            split(1, 1, 2, 3, "age", 30.0),
            split(3, 1, 2, 3, "age", 45.5),
        ],
    })
    .unwrap()
}

#[test]
fn all_no_dif_items_are_exactly_linear() {
    let slopes = vec![1.0, 0.37, -0.8, 2.5];
    let offsets = vec![0.1, -1.3, 0.0, 4.2];
    let model = IftModel::new(ModelTables {
        slopes: slopes.clone(),
        item_labels: None,
        dif_leaves: Vec::new(),
        no_dif_offsets: offsets
            .iter()
            .enumerate()
            .map(|(i, &offset)| NoDifOffset { item: i + 1, offset })
            .collect(),
        splits: Vec::new(),
    })
    .unwrap();

    let data = random_data(200, 7);
    let out = predict(&model, &data, "score").unwrap();
    let score = data.column("score").unwrap();

    for (i, item) in out.items.iter().enumerate() {
        for (row, &n) in item.linear_predictor.iter().enumerate() {
            assert_eq!(n, slopes[i] * score[row] + offsets[i]);
        }
    }
}

#[test]
fn single_split_selects_exactly_one_leaf_per_row() {
    let model = mixed_model();
    let data = random_data(500, 11);
    let out = predict(&model, &data, "score").unwrap();
    let score = data.column("score").unwrap();
    let age = data.column("age").unwrap();

    for (row, &n) in out.items[0].linear_predictor.iter().enumerate() {
        let branch = n - 0.3 * score[row];
        let expected = if age[row] <= 30.0 { 0.5 } else { -0.3 };
        assert_abs_diff_eq!(branch, expected, epsilon = 1e-12);
    }
}

#[test]
fn nested_tree_follows_both_levels() {
    let model = mixed_model();
    let data = random_data(500, 13);
    let out = predict(&model, &data, "score").unwrap();
    let score = data.column("score").unwrap();
    let age = data.column("age").unwrap();
    let sex = data.column("sex").unwrap();

    for (row, &n) in out.items[2].linear_predictor.iter().enumerate() {
        let expected = if age[row] <= 45.5 {
            -1.0
        } else if sex[row] <= 0.0 {
            0.4
        } else {
            -2.2
        };
        assert_abs_diff_eq!(n, 0.25 * score[row] + expected, epsilon = 1e-12);
    }
}

#[test]
fn repeated_runs_are_identical() {
    let model = mixed_model();
    let data = random_data(300, 3);
    let first = predict(&model, &data, "score").unwrap();
    let second = predict(&model, &data, "score").unwrap();
    assert_eq!(first, second);
    assert_eq!(first.equation_strings(), second.equation_strings());
}

#[test]
fn probabilities_are_bounded_and_classes_match() {
    let model = mixed_model();
    let data = random_data(300, 5);
    let out = predict(&model, &data, "score").unwrap();

    for item in &out.items {
        for (&p, &class) in item.probability.iter().zip(item.prediction.iter()) {
            assert!((0.0..=1.0).contains(&p), "probability {p} out of range");
            assert_eq!(class == 1, p >= 0.5);
        }
    }

    for eta in [-1e6, -745.0, -40.0, 0.0, 40.0, 745.0, 1e6] {
        let p = logistic(eta);
        assert!((0.0..=1.0).contains(&p), "logistic({eta}) = {p}");
    }
}

#[test]
fn scenario_slope_one_offset_point_one() {
    let model = IftModel::new(ModelTables {
        slopes: vec![1.0],
        item_labels: None,
        dif_leaves: Vec::new(),
        no_dif_offsets: vec![NoDifOffset {
            item: 1,
            offset: 0.1,
        }],
        splits: Vec::new(),
    })
    .unwrap();
    let data = Dataset::from_columns([("total", Array1::from_vec(vec![2.0]))]).unwrap();
    let out = predict(&model, &data, "total").unwrap();

    assert_abs_diff_eq!(out.items[0].linear_predictor[0], 2.1, epsilon = 1e-12);
    assert_abs_diff_eq!(out.items[0].probability[0], 0.8909, epsilon = 1e-4);
    assert_eq!(out.items[0].prediction[0], 1);
    assert_eq!(
        out.dataset.column_names(),
        &["total".to_string(), "n1".into(), "p1".into(), "I1".into()]
    );
}

#[test]
fn equations_are_labelled_and_ordered() {
    let out = predict(&mixed_model(), &random_data(4, 1), "score").unwrap();
    let equations = out.equation_strings();
    let labels: Vec<&str> = equations.iter().map(|(label, _)| label.as_str()).collect();
    assert_eq!(labels, vec!["q1", "q2", "q3"]);
    assert_eq!(equations[1].1, "(-0.1 * score) + 0.7");
    assert_eq!(
        equations[2].1,
        "(0.25 * score) + (-1 * (age <= 45.5)) + (0.4 * (age > 45.5) * (sex <= 0)) + (-2.2 * (age > 45.5) * (sex > 0))"
    );
}

#[test]
fn missing_child_node_is_split_not_found() {
    let err = IftModel::new(ModelTables {
        slopes: vec![1.0],
        item_labels: None,
        dif_leaves: vec![leaf(1, 2, 0.5)],
        no_dif_offsets: Vec::new(),
        splits: vec![split(1, 1, 2, 3, "age", 30.0)],
    })
    .unwrap_err();

    match err {
        ModelError::InvalidTree { item, source } => {
            assert_eq!(item, 1);
            assert_eq!(source, TreeError::SplitNotFound { node: 3 });
        }
        other => panic!("Expected InvalidTree(SplitNotFound), got {other:?}"),
    }
}

#[test]
fn non_finite_inputs_fail_instead_of_dropping_the_branch() {
    let model = mixed_model();
    let with_nan_age = Dataset::from_columns([
        ("score", Array1::from_vec(vec![2.0, 3.0])),
        ("age", Array1::from_vec(vec![f64::NAN, 25.0])),
        ("sex", Array1::from_vec(vec![0.0, 1.0])),
    ])
    .unwrap();
    assert_eq!(
        predict(&model, &with_nan_age, "score").unwrap_err(),
        PredictError::NonFiniteValue {
            column: "age".to_string(),
            row: 0
        }
    );

    let with_nan_score = Dataset::from_columns([
        ("score", Array1::from_vec(vec![2.0, f64::NAN])),
        ("age", Array1::from_vec(vec![40.0, 25.0])),
        ("sex", Array1::from_vec(vec![0.0, 1.0])),
    ])
    .unwrap();
    assert_eq!(
        predict(&model, &with_nan_score, "score").unwrap_err(),
        PredictError::NonFiniteValue {
            column: "score".to_string(),
            row: 1
        }
    );
}
