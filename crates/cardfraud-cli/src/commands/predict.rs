use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use cardfraud_models::data::{read_unlabelled_csv, DatasetReaderConfig};
use cardfraud_models::models::Predictor;
use cardfraud_models::pipeline::load_pipeline;

/// Score every row of `input_path` with a saved pipeline and write the input
/// columns followed by `pred` and `fraud_probability` to `output_path`.
///
/// Returns the number of rows written.
pub fn run_prediction(
    model_path: &Path,
    input_path: &Path,
    output_path: &Path,
    reader: &DatasetReaderConfig,
) -> Result<usize> {
    let pipeline = load_pipeline(model_path)
        .with_context(|| format!("Failed to load model: {}", model_path.display()))?;
    let table = read_unlabelled_csv(input_path, reader, &pipeline.metadata.feature_names)
        .with_context(|| format!("Failed to read input data: {}", input_path.display()))?;

    let probabilities = pipeline.predict_proba(&table.x)?;
    let predictions = pipeline.predict(&table.x)?;

    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut writer = csv::WriterBuilder::new()
        .delimiter(reader.delimiter)
        .from_path(output_path)
        .with_context(|| format!("Failed to create {}", output_path.display()))?;

    let mut header = table.headers.clone();
    header.push_field("pred");
    header.push_field("fraud_probability");
    writer.write_record(&header)?;

    for ((record, pred), proba) in table
        .records
        .iter()
        .zip(predictions.iter())
        .zip(probabilities.iter())
    {
        let mut row = record.clone();
        row.push_field(&pred.to_string());
        row.push_field(&proba.to_string());
        writer.write_record(&row)?;
    }
    writer.flush()?;

    log::info!(
        "Wrote {} predictions of {} to {}",
        table.len(),
        pipeline.name(),
        output_path.display()
    );
    Ok(table.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cardfraud_models::config::DataProcessingArgs;
    use cardfraud_models::models::linear::LinearModel;
    use cardfraud_models::models::FittedModel;
    use cardfraud_models::pipeline::{save_pipeline, ModelPipeline, PipelineMetadata};

    #[test]
    fn writes_input_columns_then_predictions() {
        let dir = tempfile::tempdir().unwrap();
        let model_path = dir.path().join("model.json");
        let pipeline = ModelPipeline::new(
            None,
            FittedModel::Linear(LinearModel {
                weights: vec![1.0],
                intercept: -100.0,
            }),
            PipelineMetadata::new(
                "lr",
                vec!["amount".to_string()],
                DataProcessingArgs::default(),
            ),
        );
        save_pipeline(&pipeline, &model_path).unwrap();

        let input = dir.path().join("new.csv");
        fs::write(&input, "transaction_id,hour,amount\nt1,3,5.0\nt2,4,900.0\n").unwrap();
        let output = dir.path().join("out").join("predictions.csv");

        let n = run_prediction(&model_path, &input, &output, &DatasetReaderConfig::default())
            .unwrap();
        assert_eq!(n, 2);

        let mut rows = csv::Reader::from_path(&output).unwrap();
        let headers = rows.headers().unwrap().clone();
        assert_eq!(
            headers.iter().collect::<Vec<_>>(),
            vec!["transaction_id", "hour", "amount", "pred", "fraud_probability"]
        );
        let records: Vec<_> = rows.records().map(|r| r.unwrap()).collect();
        assert_eq!(&records[0][0], "t1");
        assert_eq!(&records[0][3], "0");
        assert_eq!(&records[1][3], "1");
        assert!(records[1][4].parse::<f64>().unwrap() > 0.99);
    }

    #[test]
    fn missing_feature_column_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let model_path = dir.path().join("model.json");
        let pipeline = ModelPipeline::new(
            None,
            FittedModel::Linear(LinearModel {
                weights: vec![1.0],
                intercept: 0.0,
            }),
            PipelineMetadata::new(
                "lr",
                vec!["amount".to_string()],
                DataProcessingArgs::default(),
            ),
        );
        save_pipeline(&pipeline, &model_path).unwrap();
        let input = dir.path().join("new.csv");
        fs::write(&input, "transaction_id,hour\nt1,3\n").unwrap();

        let err = run_prediction(
            &model_path,
            &input,
            &dir.path().join("out.csv"),
            &DatasetReaderConfig::default(),
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("amount"));
    }
}
