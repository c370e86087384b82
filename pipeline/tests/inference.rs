mod common;

use std::path::Path;

use common::{B, ScriptedModel, examples, write_gray16};
use dataset::{FolderDataset, InMemorySource, LoadConfig, Split};
use pipeline::{InferenceConfig, InferenceRunner, PipelineError};
use train::model::TranslationModel;

fn eval_load() -> LoadConfig {
    LoadConfig::new("/unused".into()).for_evaluation()
}

#[test]
fn writes_one_prediction_per_example_in_order() {
    let tmp = tempfile::tempdir().unwrap();
    let results = tmp.path().join("results");
    let mut model = ScriptedModel::<B>::default();
    model.set_stochastic_inference(true);
    let mut source = InMemorySource::new(Split::Test, examples(3, 8), 1);

    let written = InferenceRunner::new(
        &mut model,
        InferenceConfig::new(results.to_string_lossy().into_owned()),
        &eval_load(),
    )
    .unwrap()
    .run(&mut source)
    .unwrap();

    let expected: Vec<_> = ["ex0", "ex1", "ex2"]
        .iter()
        .map(|id| results.join(format!("{id}.tiff")))
        .collect();
    assert_eq!(written, expected);
    for path in &written {
        let image = image::open(path).unwrap();
        assert_eq!((image.width(), image.height()), (8, 8));
    }
    // Every forward pass ran deterministically, and the caller's flag survives.
    assert_eq!(*model.forward_flags.borrow(), [false, false, false]);
    assert!(model.stochastic_inference());
}

#[test]
fn how_many_limits_the_run() {
    let tmp = tempfile::tempdir().unwrap();
    let mut model = ScriptedModel::<B>::default();
    let mut source = InMemorySource::new(Split::Test, examples(5, 8), 1);

    let written = InferenceRunner::new(
        &mut model,
        InferenceConfig::new(tmp.path().to_string_lossy().into_owned()).with_how_many(Some(2)),
        &eval_load(),
    )
    .unwrap()
    .run(&mut source)
    .unwrap();
    assert_eq!(written.len(), 2);
    assert_eq!(model.forward_flags.borrow().len(), 2);
}

#[test]
fn refuses_batched_or_shuffled_streams() {
    let mut model = ScriptedModel::<B>::default();
    let config = InferenceConfig::new("/tmp/results".into());
    let load = LoadConfig::new("/unused".into());
    assert!(matches!(
        InferenceRunner::new(&mut model, config.clone(), &load),
        Err(PipelineError::Config(_))
    ));
    assert!(InferenceRunner::new(&mut model, config, &eval_load().with_batch_size(4)).is_err());
}

#[test]
fn runs_over_a_folder_dataset() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("data");
    for name in ["b_phase.tif", "a_phase.tif"] {
        let values: Vec<u16> = (0..16u16).map(|v| v * 1000).collect();
        write_gray16(&root.join("input").join("test").join(name), 4, 4, values.clone());
        write_gray16(&root.join("nuclei").join("test").join(name), 4, 4, values);
    }
    let load = LoadConfig::new(root.to_string_lossy().into_owned())
        .with_load_size(Some(4))
        .for_evaluation();
    let mut dataset =
        FolderDataset::<B>::open(load.clone(), Split::Test, &Default::default()).unwrap();

    let results = tmp.path().join("results");
    let mut model = ScriptedModel::<B>::default();
    let written = InferenceRunner::new(
        &mut model,
        InferenceConfig::new(results.to_string_lossy().into_owned()),
        &load,
    )
    .unwrap()
    .run(&mut dataset)
    .unwrap();

    let names: Vec<_> = written
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, ["a_phase.tiff", "b_phase.tiff"]);
    assert!(Path::new(&results).join("a_phase.tiff").exists());
}
