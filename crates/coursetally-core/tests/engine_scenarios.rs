//! End-to-end engine scenarios on the persistent backend.
//!
//! The unit tests cover each module in isolation; these tests drive the
//! whole engine against redb storage, including restarts.

#![allow(clippy::unwrap_used)]

use coursetally_core::{
    ClassId, ClassRecord, CourseId, EngineConfig, Identity, MetricName, MetricRegistry,
    RatingEngine, Roster, SectionRef, Semester, TallyError, Term, UserId,
};
use tempfile::tempdir;

fn roster() -> Roster {
    let fa24 = Term::new(2024, Semester::Fall);
    let sp25 = Term::new(2025, Semester::Spring);
    Roster::from_records(vec![
        ClassRecord {
            class_id: ClassId::new("cs2110-fa24-001"),
            course_id: CourseId::new("cs2110"),
            subject: "CS".to_string(),
            course_number: "2110".to_string(),
            class_number: "001".to_string(),
            term: fa24,
            instructors: vec!["Gries".to_string()],
        },
        ClassRecord {
            class_id: ClassId::new("cs2110-sp25-001"),
            course_id: CourseId::new("cs2110"),
            subject: "CS".to_string(),
            course_number: "2110".to_string(),
            class_number: "001".to_string(),
            term: sp25,
            instructors: vec!["Muhlberger".to_string()],
        },
    ])
}

fn open_engine(path: &std::path::Path) -> RatingEngine {
    RatingEngine::with_redb(
        path,
        roster(),
        MetricRegistry::default(),
        EngineConfig::default(),
    )
    .expect("open engine")
}

fn fa24() -> SectionRef {
    SectionRef {
        subject: "CS".to_string(),
        course_number: "2110".to_string(),
        class_number: "001".to_string(),
        term: Term::new(2024, Semester::Fall),
    }
}

fn sp25() -> SectionRef {
    SectionRef {
        term: Term::new(2025, Semester::Spring),
        ..fa24()
    }
}

#[test]
fn ratings_and_counters_survive_restart() {
    let temp = tempdir().expect("temp dir");
    let db_path = temp.path().join("tally.redb");
    let alice = Identity::User(UserId::new("amw23"));

    {
        let mut engine = open_engine(&db_path);
        engine
            .submit_rating(&alice, &fa24(), &MetricName::new("overall"), 4)
            .unwrap();
        engine
            .submit_rating(&alice, &fa24(), &MetricName::new("would_recommend"), 1)
            .unwrap();
    }

    let mut engine = open_engine(&db_path);
    assert_eq!(engine.rating_count().unwrap(), 2);

    let aggs = engine.course_aggregate("CS", "2110", None).unwrap();
    let overall = aggs.iter().find(|a| a.metric.as_str() == "overall").unwrap();
    assert_eq!(overall.total, 1);
    assert_eq!(overall.mean, Some(4.0));

    // Identity survives too: a resubmission after restart updates the
    // original fact instead of inserting a duplicate.
    engine
        .submit_rating(&alice, &fa24(), &MetricName::new("overall"), 2)
        .unwrap();
    assert_eq!(engine.rating_count().unwrap(), 2);
}

#[test]
fn term_replacement_persists_on_disk() {
    let temp = tempdir().expect("temp dir");
    let db_path = temp.path().join("tally.redb");
    let alice = Identity::User(UserId::new("amw23"));

    {
        let mut engine = open_engine(&db_path);
        engine
            .submit_rating(&alice, &fa24(), &MetricName::new("overall"), 3)
            .unwrap();
        engine
            .submit_rating(&alice, &sp25(), &MetricName::new("overall"), 5)
            .unwrap();
    }

    let mut engine = open_engine(&db_path);
    assert_eq!(engine.rating_count().unwrap(), 1);

    let fa24_aggs = engine
        .class_aggregate("CS", "2110", Some("001"), fa24().term, None)
        .unwrap();
    assert!(fa24_aggs.iter().all(|a| a.total == 0));

    let sp25_aggs = engine
        .class_aggregate("CS", "2110", Some("001"), sp25().term, None)
        .unwrap();
    let overall = sp25_aggs
        .iter()
        .find(|a| a.metric.as_str() == "overall")
        .unwrap();
    assert_eq!(overall.total, 1);
    assert_eq!(overall.mean, Some(5.0));

    let terms = engine.semesters_with_ratings("CS", "2110").unwrap();
    assert_eq!(terms.len(), 1);
    assert_eq!(terms[0].term, sp25().term);
}

#[test]
fn failed_batch_leaves_disk_untouched() {
    let temp = tempdir().expect("temp dir");
    let db_path = temp.path().join("tally.redb");
    let alice = Identity::User(UserId::new("amw23"));
    let mut engine = open_engine(&db_path);

    engine
        .submit_rating(&alice, &fa24(), &MetricName::new("overall"), 4)
        .unwrap();

    // Batch with an out-of-domain value: rejected before any write.
    let batch = vec![
        (MetricName::new("overall"), 5),
        (MetricName::new("difficulty"), 3),
        (MetricName::new("workload"), 99),
    ];
    let err = engine
        .submit_rating_batch(&alice, &sp25(), &batch)
        .unwrap_err();
    assert!(matches!(err, TallyError::InvalidArgument { value: 99, .. }));

    // The original rating is still there, still on the fa24 offering.
    assert_eq!(engine.rating_count().unwrap(), 1);
    let aggs = engine
        .class_aggregate("CS", "2110", Some("001"), fa24().term, None)
        .unwrap();
    let overall = aggs.iter().find(|a| a.metric.as_str() == "overall").unwrap();
    assert_eq!(overall.total, 1);
}

#[test]
fn instructor_views_follow_the_roster() {
    let temp = tempdir().expect("temp dir");
    let db_path = temp.path().join("tally.redb");
    let mut engine = open_engine(&db_path);

    let alice = Identity::User(UserId::new("amw23"));
    let bob = Identity::User(UserId::new("bb12"));
    engine
        .submit_rating(&alice, &fa24(), &MetricName::new("overall"), 4)
        .unwrap();
    engine
        .submit_rating(&bob, &sp25(), &MetricName::new("overall"), 2)
        .unwrap();

    let aggs = engine.instructor_aggregates("CS", "2110").unwrap();
    assert_eq!(aggs.len(), 2);
    let gries = aggs.iter().find(|a| a.instructor == "Gries").unwrap();
    let overall = gries
        .metrics
        .iter()
        .find(|m| m.metric.as_str() == "overall")
        .unwrap();
    assert_eq!(overall.total, 1);
    assert_eq!(overall.mean, Some(4.0));
}
