//! Tests for the batch pipeline and the background runner

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;
    use std::sync::Mutex;

    use linetrace_core::config::PipelineConfig;
    use linetrace_core::error::PipelineError;
    use linetrace_core::output::{Metadata, RACING_LINE_FILE, TRAJECTORY_DIR};
    use linetrace_core::pipeline::run_pipeline;
    use linetrace_core::progress::NoopProgress;
    use linetrace_core::runner::PipelineRunner;
    use linetrace_core::synthetic::SessionBuilder;
    use linetrace_core::trail::TRAIL_DIR;
    use pretty_assertions::assert_eq;

    fn session() -> SessionBuilder {
        SessionBuilder::new(17)
            .gps_noise_m(0.3)
            .car("GR86-001-10", 4, 150.0)
            .car("GR86-002-11", 4, 148.0)
            .car("GR86-003-12", 4, 146.0)
            .car("GR86-004-13", 2, 150.0)
    }

    fn write_rows(path: &Path, rows: &[(&str, &str, &str)]) {
        let mut body = String::from("timestamp,vehicle_id,lap,telemetry_name,telemetry_value\n");
        for (i, (vehicle, name, value)) in rows.iter().enumerate() {
            body.push_str(&format!(
                "2025-04-27T14:00:{:02}.000Z,{vehicle},1,{name},{value}\n",
                i / 4
            ));
        }
        fs::write(path, body).unwrap();
    }

    #[test]
    fn test_full_run_writes_dataset() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("session.csv");
        let output = dir.path().join("processed");
        session().write_csv(&input).unwrap();

        let updates = Mutex::new(Vec::new());
        let sink = |message: &str, fraction: f64| {
            updates.lock().unwrap().push((message.to_string(), fraction));
        };
        let summary = run_pipeline(&input, &output, &PipelineConfig::default(), &sink).unwrap();

        assert_eq!(summary.vehicles.len(), 4);
        assert!(summary.skipped.is_empty());
        assert_eq!(summary.car_lines, 3);
        assert_eq!(summary.racing_line_points, 1500);
        assert!(summary.canonical.is_some());
        assert_eq!(summary.trails, 3);

        let metadata = Metadata::load(&output).unwrap();
        assert_eq!(metadata.car_ids, summary.vehicles);
        assert_eq!(metadata.racing_line_metadata.len(), 3);
        assert!(!metadata.racing_line_metadata.contains_key("GR86-004-13"));
        assert!(metadata.per_car_racing_lines);
        assert_eq!(metadata.sample_rate_ms, 10);

        assert!(output.join(RACING_LINE_FILE).exists());
        assert_eq!(fs::read_dir(output.join(TRAJECTORY_DIR)).unwrap().count(), 4);
        assert!(output.join(TRAIL_DIR).is_dir());

        let updates = updates.into_inner().unwrap();
        assert_eq!(updates[0], ("Loading telemetry data...".to_string(), 0.0));
        assert!(updates.iter().any(|(m, _)| m == "Found 4 vehicles (2/27)"));
        assert!(updates
            .iter()
            .any(|(m, _)| m == "GR86-001-10 - Extracting signals (3/27)"));
        assert!(updates
            .iter()
            .any(|(m, f)| m == "Running section compare processing..." && *f == 0.85));
        assert_eq!(updates.last().unwrap(), &("Complete!".to_string(), 1.0));
    }

    #[test]
    fn test_missing_core_channel_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("speed_only.csv");
        write_rows(&input, &[("A", "speed", "100.0"), ("A", "speed", "101.0")]);

        let err = run_pipeline(&input, dir.path(), &PipelineConfig::default(), &NoopProgress)
            .unwrap_err();
        match err {
            PipelineError::Validation(msg) => assert!(msg.contains("lat"), "{msg}"),
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn test_all_vehicles_too_short() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("short.csv");
        let mut rows = Vec::new();
        for _ in 0..5 {
            rows.push(("A", "VBOX_Lat_Min", "33.5326"));
            rows.push(("A", "VBOX_Long_Minutes", "-86.6195"));
            rows.push(("A", "Laptrigger_lapdist_dls", "10.0"));
            rows.push(("A", "speed", "120.0"));
        }
        write_rows(&input, &rows);

        let err = run_pipeline(
            &input,
            &dir.path().join("out"),
            &PipelineConfig::default(),
            &NoopProgress,
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::NoVehicles), "{err:?}");
    }

    #[tokio::test]
    async fn test_runner_streams_progress() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("session.csv");
        SessionBuilder::new(2)
            .core_channels_only()
            .car("A", 3, 150.0)
            .write_csv(&input)
            .unwrap();

        let runner = PipelineRunner::default();
        let (result, updates) = runner.run(input, dir.path().join("out")).await;
        let summary = result.unwrap();
        assert_eq!(summary.vehicles, vec!["A".to_string()]);
        assert_eq!(updates.first().unwrap().message, "Loading telemetry data...");
        assert_eq!(updates.last().unwrap().message, "Complete!");
        assert!(updates.iter().any(|u| u.message == "Found 1 vehicles (2/9)"));
    }
}
