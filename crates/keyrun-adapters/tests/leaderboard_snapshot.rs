use std::path::PathBuf;
use std::sync::Arc;

use keyrun_adapters::{LeaderboardNormalizer, NormalizeError};
use keyrun_core::{ActivityCatalog, ScoringEngine, SpecCatalog};
use serde_json::Value;

fn fixture_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/leaderboards")
}

fn normalizer() -> LeaderboardNormalizer {
    LeaderboardNormalizer::new(
        Arc::new(SpecCatalog::standard()),
        ScoringEngine::new(Arc::new(ActivityCatalog::standard())),
    )
}

#[test]
fn us_cluster_leaderboard_matches_snapshot() {
    let body = std::fs::read(fixture_dir().join("us-11-375-777.json")).unwrap();
    let snapshot: Value = serde_json::from_str(
        &std::fs::read_to_string(fixture_dir().join("us-11-375-777.snapshot.json")).unwrap(),
    )
    .unwrap();

    let batch = normalizer().normalize_bytes(&body).unwrap();

    assert_eq!(batch.region.slug(), snapshot["region"]);
    assert_eq!(batch.activity_id, snapshot["activity_id"]);
    assert_eq!(batch.period, snapshot["period"]);
    assert_eq!(batch.cluster_id, snapshot["cluster_id"].as_u64().map(|v| v as u32));
    assert_eq!(
        serde_json::to_value(&batch.affixes).unwrap(),
        snapshot["affixes"]
    );
    let rejected: Vec<usize> = batch.rejected.iter().map(|r| r.position).collect();
    assert_eq!(serde_json::to_value(rejected).unwrap(), snapshot["rejected_positions"]);
    assert!(batch
        .rejected
        .iter()
        .all(|r| matches!(r.error, NormalizeError::RosterSize { found: 4 })));

    let expected_runs = snapshot["runs"].as_array().unwrap();
    assert_eq!(batch.records.len(), expected_runs.len());
    for (record, expected) in batch.records.iter().zip(expected_runs) {
        let run = &record.run;
        assert_eq!(run.id.to_string(), expected["id"]);
        assert_eq!(run.difficulty_level, expected["difficulty_level"]);
        assert_eq!(
            run.completed_at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            expected["completed_at"]
        );
        assert_eq!(run.duration_ms, expected["duration_ms"]);
        assert_eq!(serde_json::to_value(run.faction).unwrap(), expected["faction"]);
        assert_eq!(run.is_successful, expected["is_successful"]);
        assert_eq!(run.composition_signature, expected["composition_signature"]);
        let expected_score = expected["score"].as_f64().unwrap();
        assert!(
            (run.score - expected_score).abs() < 0.01,
            "score {} vs {expected_score}",
            run.score
        );

        let participants: Vec<u64> = record.roster.iter().map(|r| r.participant_id).collect();
        assert_eq!(serde_json::to_value(participants).unwrap(), expected["participants"]);
        assert!(record.roster.iter().all(|r| r.run_id == run.id));
    }
}

#[test]
fn fixture_normalizes_identically_twice() {
    let body = std::fs::read(fixture_dir().join("us-11-375-777.json")).unwrap();
    let first = normalizer().normalize_bytes(&body).unwrap();
    let second = normalizer().normalize_bytes(&body).unwrap();
    assert_eq!(first.records, second.records);
}
