// Shared fixtures and end-to-end scenarios for the fraud pipeline.
use std::fmt::Write as _;

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::csv_reader::read_frame;
use crate::features::{assemble, FeatureMatrix};
use crate::frame::Frame;

const TRANSACTION_HEADER: &str = "step,type,amount,nameOrig,oldbalanceOrg,newbalanceOrig,nameDest,\
oldbalanceDest,newbalanceDest,isFraud,balance_delta,balance_change_ratio,is_cashout,is_payment,\
is_transfer,is_cashin,is_merchant";

const TYPES: [&str; 5] = ["PAYMENT", "TRANSFER", "CASH_OUT", "CASH_IN", "DEBIT"];

/// Parse an in-memory CSV into a frame.
pub(crate) fn frame_from_csv(data: &str) -> Frame {
    read_frame(csv::Reader::from_reader(data.as_bytes())).expect("valid test CSV")
}

/// Seeded transactions in the layout of `transactions_clean`. Roughly one in
/// five rows is fraud, always a TRANSFER or CASH_OUT that mostly drains the
/// origin account.
pub(crate) fn synthetic_csv(n: usize, seed: u64) -> String {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut out = String::from(TRANSACTION_HEADER);
    out.push('\n');

    for _ in 0..n {
        let step: i64 = rng.gen_range(1..=743);
        let kind = *TYPES.choose(&mut rng).expect("non-empty");
        let draining = kind == "TRANSFER" || kind == "CASH_OUT";
        let fraud = draining && rng.gen_bool(0.45);

        let amount = (rng.gen_range(10.0..5000.0_f64) * 100.0).round() / 100.0;
        let old_orig = if fraud && rng.gen_bool(0.9) {
            amount
        } else {
            ((amount + rng.gen_range(0.0..10000.0)) * 100.0).round() / 100.0
        };
        let new_orig = match kind {
            "CASH_IN" => old_orig + amount,
            _ if fraud => 0.0,
            _ => (old_orig - amount).max(0.0),
        };
        let old_dest = (rng.gen_range(0.0..20000.0_f64) * 100.0).round() / 100.0;
        let new_dest = if kind == "PAYMENT" { old_dest } else { old_dest + amount };
        let delta = new_orig - old_orig;
        let ratio = delta / old_orig;

        let name_orig = format!("C{}", rng.gen_range(1000..1050));
        let name_dest = if kind == "PAYMENT" {
            format!("M{}", rng.gen_range(2000..2030))
        } else {
            format!("C{}", rng.gen_range(3000..3040))
        };
        let flag = |b: bool| if b { "True" } else { "False" };

        writeln!(
            out,
            "{},{},{:.2},{},{:.2},{:.2},{},{:.2},{:.2},{},{:.2},{:.6},{},{},{},{},{}",
            step,
            kind,
            amount,
            name_orig,
            old_orig,
            new_orig,
            name_dest,
            old_dest,
            new_dest,
            u8::from(fraud),
            delta,
            ratio,
            flag(kind == "CASH_OUT"),
            flag(kind == "PAYMENT"),
            flag(kind == "TRANSFER"),
            flag(kind == "CASH_IN"),
            flag(name_dest.starts_with('M')),
        )
        .expect("write to string");
    }
    out
}

pub(crate) fn synthetic_frame(n: usize, seed: u64) -> Frame {
    frame_from_csv(&synthetic_csv(n, seed))
}

pub(crate) fn synthetic_matrix(n: usize, seed: u64) -> FeatureMatrix {
    assemble(&synthetic_frame(n, seed)).expect("complete synthetic rows")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::fs;
    use std::path::Path;

    use async_trait::async_trait;

    use super::*;
    use crate::aggregate::{aggregate, aggregate_all, Grouping};
    use crate::config::AppConfig;
    use crate::error::PipelineError;
    use crate::pipeline;
    use crate::source::TransactionSource;

    /// Serves a frame that is already in memory.
    struct MemorySource(Frame);

    #[async_trait]
    impl TransactionSource for MemorySource {
        fn describe(&self) -> String {
            "memory".to_string()
        }

        async fn load(&self) -> Result<Frame, PipelineError> {
            Ok(self.0.clone())
        }
    }

    /// Behaves like a database that never came up.
    struct UnreachableSource;

    #[async_trait]
    impl TransactionSource for UnreachableSource {
        fn describe(&self) -> String {
            "unreachable".to_string()
        }

        async fn load(&self) -> Result<Frame, PipelineError> {
            Err(PipelineError::Connect {
                attempts: 5,
                source: sqlx::Error::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "connection refused",
                )),
            })
        }
    }

    fn config_for(export_dir: &Path) -> AppConfig {
        let vars: HashMap<String, String> = [
            (
                "FRAUD_PIPELINE__EXPORT_DIR".to_string(),
                export_dir.display().to_string(),
            ),
            ("FRAUD_MODELING__WORKERS".to_string(), "2".to_string()),
        ]
        .into_iter()
        .collect();
        AppConfig::from_vars(vars).expect("test configuration")
    }

    fn read_rows(path: &Path) -> (csv::StringRecord, Vec<csv::StringRecord>) {
        let mut rdr = csv::Reader::from_path(path).unwrap();
        let header = rdr.headers().unwrap().clone();
        let rows = rdr.records().collect::<Result<Vec<_>, _>>().unwrap();
        (header, rows)
    }

    #[test]
    fn test_synthetic_data_is_complete() {
        let frame = synthetic_frame(200, 1);
        let matrix = assemble(&frame).unwrap();
        assert_eq!(frame.n_rows(), 200);
        assert_eq!(matrix.n_samples(), 200, "every synthetic row has all features");
        assert!(matrix.positives() > 10, "synthetic data should carry fraud");
        assert!(matrix.positives() < 100, "fraud should stay the minority");
    }

    #[test]
    fn test_all_transfer_scenario() {
        let mut data = String::from("step,type,amount,isFraud\n");
        for i in 0..10 {
            let fraud = u8::from(i < 2);
            data.push_str(&format!("{},TRANSFER,{}.0,{}\n", i + 1, (i + 1) * 100, fraud));
        }
        let frame = frame_from_csv(&data);
        let table = aggregate(&frame, Grouping::Type).unwrap().unwrap();

        assert_eq!(table.rows.len(), 1, "one type means one group");
        let row = &table.rows[0];
        assert_eq!(row.key.to_string(), "TRANSFER");
        assert_eq!(row.total_transactions, 10);
        assert_eq!(row.fraud_cases, 2);
        assert_eq!(row.fraud_rate(), 20.0);
        assert_eq!(row.total_fraud_loss_usd, 300.0);
    }

    #[test]
    fn test_aggregate_invariants_on_synthetic_data() {
        let frame = synthetic_frame(500, 9);
        let tables = aggregate_all(&frame).unwrap();
        assert_eq!(tables.len(), 4);

        for table in &tables {
            for row in &table.rows {
                assert!(row.fraud_cases <= row.total_transactions);
                if row.fraud_cases == 0 {
                    assert_eq!(row.fraud_rate(), 0.0);
                    assert_eq!(row.total_fraud_loss_usd, 0.0);
                }
            }
            assert_eq!(table.total_transactions(), 500, "{:?}", table.grouping);
        }

        let by_type = tables
            .iter()
            .find(|t| t.grouping == Grouping::Type)
            .unwrap();
        let payment = by_type
            .rows
            .iter()
            .find(|r| r.key.to_string() == "PAYMENT")
            .expect("zero-fraud group is still reported");
        assert_eq!(payment.fraud_cases, 0);

        let by_day = tables.iter().find(|t| t.grouping == Grouping::Day).unwrap();
        assert!(by_day.rows.len() <= 7);
    }

    #[tokio::test]
    async fn test_pipeline_writes_every_export() {
        let tmp = tempfile::tempdir().unwrap();
        let export_dir = tmp.path().join("exports");
        let config = config_for(&export_dir);
        let frame = synthetic_frame(400, 21);

        let summary = pipeline::run(&config, &MemorySource(frame.clone()))
            .await
            .unwrap();
        assert_eq!(summary.rows, 400);
        assert_eq!(summary.files.len(), 7);

        for name in [
            "fraud_by_day.csv",
            "fraud_by_type.csv",
            "fraud_by_sender.csv",
            "fraud_by_receiver.csv",
            "model_metrics.csv",
            "confusion_matrix.csv",
            "transactions_scored.csv",
        ] {
            assert!(export_dir.join(name).is_file(), "{} missing", name);
        }

        let (header, rows) = read_rows(&export_dir.join("fraud_by_day.csv"));
        assert_eq!(&header[0], "step_day");
        assert!(rows.iter().all(|r| (0..7).contains(&r[0].parse::<i64>().unwrap())));

        let (header, rows) = read_rows(&export_dir.join("model_metrics.csv"));
        assert_eq!(header.len(), 6);
        assert_eq!(rows.len(), 3);
        for row in &rows {
            for value in row.iter().skip(1) {
                let v: f64 = value.parse().unwrap();
                assert!((0.0..=1.0).contains(&v), "{} out of range in {:?}", v, row);
            }
        }

        let (header, rows) = read_rows(&export_dir.join("confusion_matrix.csv"));
        assert_eq!(header.iter().collect::<Vec<_>>(), ["", "Pred_0", "Pred_1"]);
        let cells: usize = rows
            .iter()
            .flat_map(|r| r.iter().skip(1).map(|v| v.parse::<usize>().unwrap()))
            .sum();
        assert_eq!(cells, 80, "confusion cells sum to the held-out size");

        let (header, rows) = read_rows(&export_dir.join("transactions_scored.csv"));
        assert_eq!(header.len(), frame.n_columns() + 1);
        assert_eq!(&header[header.len() - 1], "fraud_score_gbm");
        assert_eq!(rows.len(), summary.modeled_rows);
        for row in &rows {
            let score: f64 = row[row.len() - 1].parse().unwrap();
            assert!((0.0..=1.0).contains(&score));
        }
    }

    #[tokio::test]
    async fn test_pipeline_is_reproducible() {
        let tmp = tempfile::tempdir().unwrap();
        let frame = synthetic_frame(300, 4);

        let first = tmp.path().join("first");
        let second = tmp.path().join("second");
        pipeline::run(&config_for(&first), &MemorySource(frame.clone()))
            .await
            .unwrap();
        pipeline::run(&config_for(&second), &MemorySource(frame))
            .await
            .unwrap();

        assert_eq!(
            fs::read_to_string(first.join("model_metrics.csv")).unwrap(),
            fs::read_to_string(second.join("model_metrics.csv")).unwrap()
        );
        assert_eq!(
            fs::read_to_string(first.join("transactions_scored.csv")).unwrap(),
            fs::read_to_string(second.join("transactions_scored.csv")).unwrap()
        );
    }

    #[tokio::test]
    async fn test_missing_key_column_skips_table() {
        let tmp = tempfile::tempdir().unwrap();
        let export_dir = tmp.path().join("exports");
        let csv = synthetic_csv(300, 5);
        // drop the leading step column
        let without_step: String = csv
            .lines()
            .map(|line| format!("{}\n", line.split_once(',').unwrap().1))
            .collect();

        let summary = pipeline::run(
            &config_for(&export_dir),
            &MemorySource(frame_from_csv(&without_step)),
        )
        .await
        .unwrap();

        assert_eq!(summary.files.len(), 6);
        assert!(!export_dir.join("fraud_by_day.csv").exists());
        assert!(export_dir.join("fraud_by_type.csv").exists());
    }

    #[tokio::test]
    async fn test_failed_source_writes_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let export_dir = tmp.path().join("exports");

        let result = pipeline::run(&config_for(&export_dir), &UnreachableSource).await;

        assert!(matches!(
            result,
            Err(PipelineError::Connect { attempts: 5, .. })
        ));
        assert!(!export_dir.exists(), "no exports after a failed load");
    }

    #[tokio::test]
    async fn test_single_class_input_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let csv = synthetic_csv(100, 6);
        let honest: String = csv
            .lines()
            .enumerate()
            .map(|(i, line)| {
                if i == 0 {
                    format!("{}\n", line)
                } else {
                    let mut cells: Vec<&str> = line.split(',').collect();
                    cells[9] = "0";
                    format!("{}\n", cells.join(","))
                }
            })
            .collect();

        let result = pipeline::run(
            &config_for(&tmp.path().join("exports")),
            &MemorySource(frame_from_csv(&honest)),
        )
        .await;

        assert!(matches!(result, Err(PipelineError::Model(_))));
    }
}
