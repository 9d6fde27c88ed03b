use std::sync::atomic::{AtomicBool, Ordering};

use tw_lang::ErrorCategory;

use super::*;

fn stored(outcome: UpsertOutcome) -> (Arc<Rule>, Option<u64>) {
    match outcome {
        UpsertOutcome::Stored {
            rule,
            previous_revision,
        } => (rule, previous_revision),
        UpsertOutcome::Rejected(f) => panic!("rule rejected: {f}"),
    }
}

fn def(rule_id: &str, source: &str) -> RuleDefinition {
    RuleDefinition::new("acme", rule_id, source)
}

#[test]
fn upsert_assigns_revisions() {
    let store = RuleStore::default();
    let (r1, prev) = stored(store.upsert(def("r", "trace.has(svc.a)")).unwrap());
    assert_eq!((r1.revision, prev), (1, None));

    let (r2, prev) = stored(store.upsert(def("r", "trace.has(svc.b)")).unwrap());
    assert_eq!((r2.revision, prev), (2, Some(1)));
    assert_eq!(store.get("acme", "r").unwrap().source, "trace.has(svc.b)");
    // the earlier handle is unchanged
    assert_eq!(r1.source, "trace.has(svc.a)");
    assert_eq!(store.rule_count(), 1);
}

#[test]
fn recreated_rule_continues_its_revisions() {
    let store = RuleStore::default();
    stored(store.upsert(def("r", "trace.has(svc.a)")).unwrap());
    let (old, _) = stored(store.upsert(def("r", "trace.has(svc.b)")).unwrap());
    store.remove("acme", "r").unwrap();

    let (new, prev) = stored(store.upsert(def("r", "trace.has(svc.zzz)")).unwrap());
    assert_eq!((new.revision, prev), (3, None));
    assert_ne!(
        crate::violation::violation_id("acme", "r", old.revision, "t1"),
        crate::violation::violation_id("acme", "r", new.revision, "t1"),
    );

    // other tenants and rule ids start fresh
    let (other, _) = stored(store.upsert(RuleDefinition::new("globex", "r", "trace.has(svc.a)")).unwrap());
    assert_eq!(other.revision, 1);
    let (sibling, _) = stored(store.upsert(def("s", "trace.has(svc.a)")).unwrap());
    assert_eq!(sibling.revision, 1);
}

#[test]
fn failed_compile_keeps_previous_revision() {
    let store = RuleStore::default();
    stored(store.upsert(def("r", "trace.has(svc.a)")).unwrap());

    let outcome = store.upsert(def("r", "trace.has(svc.a").with_severity(Severity::High)).unwrap();
    let UpsertOutcome::Rejected(failure) = outcome else {
        panic!("expected a rejection");
    };
    assert_eq!(failure.category(), ErrorCategory::SyntaxError);

    let active = store.get("acme", "r").unwrap();
    assert_eq!(active.revision, 1);
    assert_eq!(active.severity, Severity::Medium);
}

#[test]
fn warnings_are_kept_with_the_rule() {
    let store = RuleStore::default();
    let (rule, _) = stored(store.upsert(def("r", "trace.count(x) == 2")).unwrap());
    assert!(!rule.warnings.is_empty());
}

#[test]
fn remove_and_disable() {
    let store = RuleStore::default();
    stored(store.upsert(def("a", "trace.has(svc.a)")).unwrap());
    stored(store.upsert(def("b", "trace.has(svc.b)")).unwrap());
    stored(store.upsert(def("c", "trace.has(svc.c)").disabled()).unwrap());

    let ids = |rules: Vec<Arc<Rule>>| rules.iter().map(|r| r.id.clone()).collect::<Vec<_>>();
    assert_eq!(ids(store.active_rules("acme")), ["a", "b"]);

    let b = store.set_enabled("acme", "b", false).unwrap();
    assert_eq!(b.revision, 1);
    assert_eq!(ids(store.active_rules("acme")), ["a"]);

    assert_eq!(store.remove("acme", "a").unwrap().id, "a");
    assert!(store.remove("acme", "a").is_none());
    assert!(store.active_rules("acme").is_empty());
    assert_eq!(store.snapshot("acme").len(), 2);
    assert!(store.set_enabled("acme", "zzz", true).is_err());
}

#[test]
fn last_removal_drops_the_tenant() {
    let store = RuleStore::default();
    stored(store.upsert(def("a", "trace.has(svc.a)")).unwrap());
    stored(store.upsert(RuleDefinition::new("globex", "a", "trace.has(svc.a)")).unwrap());
    assert_eq!(store.tenants(), ["acme", "globex"]);
    store.remove("acme", "a");
    assert_eq!(store.tenants(), ["globex"]);
}

#[test]
fn tenant_cap_counts_only_new_ids() {
    let store = RuleStore::new(StoreConfig { max_rules_per_tenant: 2 }, &LimitsConfig::default());
    stored(store.upsert(def("a", "trace.has(svc.a)")).unwrap());
    stored(store.upsert(def("b", "trace.has(svc.b)")).unwrap());
    assert!(store.upsert(def("c", "trace.has(svc.c)")).is_err());
    stored(store.upsert(def("b", "trace.has(svc.bb)")).unwrap());
    stored(store.upsert(RuleDefinition::new("globex", "c", "trace.has(svc.c)")).unwrap());
}

#[test]
fn empty_ids_are_refused() {
    let store = RuleStore::default();
    assert!(store.upsert(def("", "trace.has(svc.a)")).is_err());
    assert!(store.upsert(RuleDefinition::new(" ", "r", "trace.has(svc.a)")).is_err());
}

#[test]
fn snapshot_is_isolated_from_later_writes() {
    let store = RuleStore::default();
    stored(store.upsert(def("a", "trace.has(svc.a)")).unwrap());
    let snap = store.snapshot("acme");
    stored(store.upsert(def("b", "trace.has(svc.b)")).unwrap());
    assert_eq!(snap.len(), 1);
    assert_eq!(store.snapshot("acme").len(), 2);
}

#[test]
fn readers_never_see_half_applied_updates() {
    let store = RuleStore::default();
    let source = |rev: u64| format!("trace.count(svc.op) > {rev}");
    stored(store.upsert(def("r", &source(1))).unwrap());
    let done = AtomicBool::new(false);

    std::thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                while !done.load(Ordering::Relaxed) {
                    for rule in store.active_rules("acme") {
                        // source, tree and revision always belong together
                        assert_eq!(rule.source, source(rule.revision));
                        assert_eq!(rule.expr.to_string(), source(rule.revision));
                    }
                }
            });
        }
        for rev in 2..=200 {
            stored(store.upsert(def("r", &source(rev))).unwrap());
        }
        done.store(true, Ordering::Relaxed);
    });
    assert_eq!(store.get("acme", "r").unwrap().revision, 200);
}
