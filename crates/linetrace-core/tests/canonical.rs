//! Tests for the canonical line engine and fastest-lap trails

#[cfg(test)]
mod tests {
    use linetrace_core::canonical::{build_canonical, load_canonical, write_canonical};
    use linetrace_core::config::{CanonicalConfig, TrailConfig};
    use linetrace_core::filters::median;
    use linetrace_core::synthetic::{SessionBuilder, TrackShape};
    use linetrace_core::trail::build_trail;

    fn config() -> CanonicalConfig {
        CanonicalConfig {
            n_points: 3000,
            ..CanonicalConfig::default()
        }
    }

    fn session() -> SessionBuilder {
        SessionBuilder::new(8)
            .core_channels_only()
            .car("A", 4, 150.0)
            .car("B", 4, 148.0)
            .car("C", 4, 146.0)
            .car("D", 2, 150.0)
    }

    #[test]
    fn test_canonical_line_geometry() {
        let builder = session();
        let result = build_canonical(&builder.build_table(), &config()).unwrap();
        let line = &result.line;

        assert_eq!(line.len(), 3000);
        assert_eq!(line.dist_m[0], 0.0);
        assert!(line.dist_m.windows(2).all(|w| w[1] > w[0]));
        assert_eq!(*line.dist_m.last().unwrap(), line.track_length_m());

        let circumference = builder.track_length_m();
        let rel = (line.track_length_m() - circumference).abs() / circumference;
        assert!(rel < 0.01, "track {} vs {}", line.track_length_m(), circumference);
    }

    #[test]
    fn test_sectors_cover_ideal_lap() {
        let result = build_canonical(&session().build_table(), &config()).unwrap();
        assert_eq!(result.sectors.len(), 3);

        let total: f64 = result.sectors.iter().map(|s| s.ideal_time_s).sum();
        assert!((total - result.line.ideal_lap_time_s()).abs() < 1e-6);
        assert_eq!(result.sectors[0].start_dist_m, 0.0);
        assert!((result.sectors[2].end_dist_m - result.line.track_length_m()).abs() < 1e-9);
        for w in result.sectors.windows(2) {
            assert!((w[0].end_dist_m - w[1].start_dist_m).abs() < 1e-9);
        }
    }

    #[test]
    fn test_short_stint_has_no_median_line() {
        let result = build_canonical(&session().build_table(), &config()).unwrap();

        let cars: Vec<&str> = result.car_lines.iter().map(|c| c.vehicle_id.as_str()).collect();
        assert_eq!(cars, vec!["A", "B", "C"]);
        assert!(result.fastest_laps.iter().all(|f| f.vehicle_id != "D"));
        assert_eq!(result.fastest_laps.len(), 3);
        assert!(result.rejected_vehicles.is_empty());
        assert_eq!(result.stats.cars_with_valid_laps, 3);
        assert_eq!(result.stats.clean_laps, 12);
        assert_eq!(result.stats.cars_after_outlier_filter, 3);
        for lap in &result.fastest_laps {
            assert!(lap.lap >= 2);
            assert!(lap.lap_time_s > 45.0 && lap.lap_time_s < 60.0, "{}", lap.lap_time_s);
        }
    }

    #[test]
    fn test_trail_uses_nearest_canonical_point() {
        let result = build_canonical(&session().build_table(), &config()).unwrap();
        let line = &result.line;
        let index = line.index();
        let fastest = &result.fastest_laps[0];

        let trail = build_trail(
            &fastest.vehicle_id,
            fastest.rows.clone(),
            line,
            &index,
            &TrailConfig::default(),
        )
        .unwrap();
        assert!(!trail.is_empty());
        let span = trail.last().unwrap().t_rel_s - trail[0].t_rel_s;
        assert!(span <= 15.0 + 1e-9);

        for p in trail.iter().step_by(7) {
            let d2 = |i: usize| (line.x_m[i] - p.x_m).powi(2) + (line.y_m[i] - p.y_m).powi(2);
            let best = (0..line.len()).map(d2).fold(f64::INFINITY, f64::min);
            let chosen = line
                .dist_m
                .iter()
                .position(|&d| d == p.canonical_dist_m)
                .unwrap();
            assert!(d2(chosen) <= best + 1e-9);
            assert_eq!(p.delta_kmh, p.delta_vs_ref_ms * 3.6);
        }
    }

    #[test]
    fn test_canonical_export_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let result = build_canonical(&session().build_table(), &config()).unwrap();
        write_canonical(&result, dir.path()).unwrap();

        let loaded = load_canonical(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.len(), result.line.len());
        assert!((loaded.track_length_m() - result.line.track_length_m()).abs() < 1e-6);
        assert!(load_canonical(&dir.path().join("missing")).unwrap().is_none());
    }

    #[test]
    fn test_rejected_car_still_sets_reference_speed() {
        let mut builder = SessionBuilder::new(41)
            .core_channels_only()
            .shape(TrackShape::Oval {
                straight_m: 600.0,
                radius_m: 200.0,
            });
        for i in 0..9 {
            builder = builder.car(format!("SLOW{i}"), 5, 130.0);
        }
        builder = builder.car("FAST", 5, 200.0);

        let result = build_canonical(&builder.build_table(), &config()).unwrap();
        assert_eq!(result.rejected_vehicles, vec!["FAST".to_string()]);
        assert_eq!(result.stats.cars_after_outlier_filter, 9);
        assert!(result.car_lines.iter().all(|c| c.vehicle_id != "FAST"));
        assert_eq!(result.stats.clean_laps, 50);

        // slow cars never exceed 130 km/h, about 36.1 m/s
        let ref_median = median(&result.line.ref_speed_ms);
        assert!(ref_median > 40.0, "median reference speed {ref_median}");
    }
}
