//! Acquisition scenarios on a 64-point grid

use doe_navigator::acquisition::sampling::squared_distance;
use doe_navigator::acquisition::{
    AcquisitionMode, DecisionFunction, DiversitySampler, SamplingMode, UncertaintySampler,
};
use doe_navigator::classifier::ClassifierSpec;
use doe_navigator::features::build_features;
use doe_navigator::search_space::{Label, LabelSchema, SearchSpace};
use doe_navigator::Error;
use ndarray::Array2;

/// 8 x 8 grid with coordinates 0..8 on each axis.
fn grid(labels: Vec<Label>) -> SearchSpace {
    #[allow(clippy::cast_precision_loss)]
    let values = Array2::from_shape_fn((64, 2), |(i, j)| {
        if j == 0 {
            (i % 8) as f64
        } else {
            (i / 8) as f64
        }
    });
    SearchSpace::from_parts(
        vec!["x".to_string(), "y".to_string()],
        values,
        labels,
        LabelSchema::default(),
    )
    .unwrap()
}

fn min_distance(x: &Array2<f64>, point: usize, set: &[usize]) -> f64 {
    set.iter()
        .map(|&s| squared_distance(x.row(point), x.row(s)))
        .fold(f64::INFINITY, f64::min)
}

#[test]
fn test_cycle_zero_fps_is_greedy_optimal() {
    let pool = grid(vec![Label::Unknown; 64]);
    let features = build_features(&pool, true).unwrap();
    let result = DiversitySampler::new(SamplingMode::Fps, 11)
        .sample(&features, 8)
        .unwrap();
    let selected = &result.indices;

    assert_eq!(selected.len(), 8);
    let mut unique = selected.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), 8);
    assert!(selected.iter().all(|&i| i < 64));
    assert!(result.probabilities.is_none());

    // brute force: at every step no excluded point was farther from the picks so far
    for step in 1..selected.len() {
        let chosen = min_distance(&features.x, selected[step], &selected[..step]);
        for candidate in (0..64).filter(|c| !selected[..=step].contains(c)) {
            let excluded = min_distance(&features.x, candidate, &selected[..step]);
            assert!(
                chosen + 1e-12 >= excluded,
                "step {step}: picked {chosen}, but {candidate} was at {excluded}"
            );
        }
    }
}

#[test]
fn test_random_sampling_is_seeded() {
    let pool = grid(vec![Label::Unknown; 64]);
    let features = build_features(&pool, true).unwrap();
    let a = DiversitySampler::new(SamplingMode::Random, 5).sample(&features, 10).unwrap();
    let b = DiversitySampler::new(SamplingMode::Random, 5).sample(&features, 10).unwrap();
    assert_eq!(a.indices, b.indices);

    let mut unique = a.indices.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), 10);
}

#[test]
fn test_diversity_sampling_refuses_labeled_pool() {
    let mut labels = vec![Label::Unknown; 64];
    labels[10] = Label::Class(1);
    let features = build_features(&grid(labels), true).unwrap();
    let err = DiversitySampler::new(SamplingMode::Fps, 0)
        .sample(&features, 4)
        .unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
}

fn cycle_one_labels() -> Vec<Label> {
    let mut labels = vec![Label::Unknown; 64];
    // lower-left corner block is class 0, upper-right block class 1
    for &i in &[0, 1, 8, 9] {
        labels[i] = Label::Class(0);
    }
    for &i in &[54, 55, 62, 63] {
        labels[i] = Label::Class(1);
    }
    labels
}

#[test]
fn test_cycle_one_exploration_with_gaussian_process() {
    let pool = grid(cycle_one_labels());
    let features = build_features(&pool, true).unwrap();
    let mut classifier = ClassifierSpec::default().build();
    let sampler = UncertaintySampler::new(DecisionFunction::default(), 0);

    let result = sampler.select(&features, &mut classifier, 8).unwrap();

    let probabilities = result.probabilities.as_ref().unwrap();
    assert_eq!(probabilities.dim(), (64, 2));
    for row in probabilities.rows() {
        assert!((row.sum() - 1.0).abs() < 1e-6);
    }
    assert_eq!(result.classes, vec![0, 1]);

    let unknown = pool.unknown_indices();
    assert_eq!(unknown.len(), 56);
    assert_eq!(result.indices.len(), 8);
    assert!(result.indices.iter().all(|i| unknown.contains(i)));
    let mut unique = result.indices.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), 8);
}

#[test]
fn test_exploitation_prefers_the_class_of_interest() {
    let pool = grid(cycle_one_labels());
    let features = build_features(&pool, true).unwrap();
    let mut classifier = ClassifierSpec::default().build();
    let decision = DecisionFunction {
        mode: AcquisitionMode::Exploitation { class: 1 },
        decimals: 2,
    };
    let result = UncertaintySampler::new(decision, 0)
        .select(&features, &mut classifier, 4)
        .unwrap();
    let probabilities = result.probabilities.unwrap();
    let scores = result.scores.unwrap();

    // the picks are the unknown points scoring highest for class 1
    let worst_pick = result
        .indices
        .iter()
        .map(|&i| scores[i])
        .fold(f64::INFINITY, f64::min);
    for i in pool.unknown_indices() {
        if !result.indices.contains(&i) {
            assert!(scores[i] <= worst_pick);
        }
    }
    // (5, 6) sits next to the class-1 block, (2, 1) next to the class-0 block
    assert!(probabilities[[53, 1]] > probabilities[[10, 1]]);
}

#[test]
fn test_batch_larger_than_unknown_is_configuration_error() {
    let mut labels = vec![Label::Class(0); 64];
    labels[0] = Label::Unknown;
    labels[63] = Label::Class(1);
    let features = build_features(&grid(labels), true).unwrap();
    let mut classifier = ClassifierSpec::default().build();
    let err = UncertaintySampler::default()
        .select(&features, &mut classifier, 2)
        .unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
}
