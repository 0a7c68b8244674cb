//! Write path tests: validation, edge maintenance and notification

use std::collections::BTreeSet;
use std::sync::Arc;

use cellforge::core::formula::ERROR_RESULT;
use cellforge::core::{SheetEngine, WriteOutcome};
use cellforge::external::NoExternalRef;
use cellforge::store::{CellStore, MemoryStore};
use cellforge::CellResponse;
use pretty_assertions::assert_eq;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;

const SHEET: &str = "sheet1";

struct Harness {
    store: Arc<MemoryStore>,
    engine: SheetEngine,
    cancel: CancellationToken,
}

impl Harness {
    fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let engine = SheetEngine::new(store.clone(), Arc::new(NoExternalRef));
        Self {
            store,
            engine,
            cancel: CancellationToken::new(),
        }
    }

    async fn write(&self, cell_id: &str, value: &str) -> WriteOutcome {
        self.engine
            .upsert(SHEET, cell_id, value, &self.cancel)
            .await
            .unwrap()
    }

    async fn read(&self, cell_id: &str) -> CellResponse {
        self.engine
            .get_cell(SHEET, cell_id, &self.cancel)
            .await
            .unwrap()
    }

    async fn stored(&self, cell_id: &str) -> Option<String> {
        self.store.get_cell(SHEET, cell_id).await.ok()
    }

    async fn dependents(&self, cell_id: &str) -> BTreeSet<String> {
        self.store.get_dependents(SHEET, cell_id).await.unwrap()
    }
}

fn set(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|name| name.to_string()).collect()
}

// ═══════════════════════════════════════════════════════════════════════════
// COMMIT TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_literal_write_commits() {
    let h = Harness::new();
    let outcome = h.write("var1", "0").await;
    assert_eq!(outcome, WriteOutcome::Committed(CellResponse::new("0", "0")));
    assert_eq!(h.stored("var1").await.as_deref(), Some("0"));
}

#[tokio::test]
async fn test_formula_write_returns_result() {
    let h = Harness::new();
    h.write("var1", "0").await;
    let outcome = h.write("var2", "=var1+1").await;
    assert_eq!(outcome, WriteOutcome::Committed(CellResponse::new("=var1+1", "1")));
}

#[tokio::test]
async fn test_overwrite_is_visible_to_dependents() {
    let h = Harness::new();
    h.write("var1", "1").await;
    h.write("var2", "=var1*10").await;
    h.write("var1", "5").await;
    assert_eq!(h.read("var2").await.result, "50");
}

#[tokio::test]
async fn test_write_ids_are_case_folded() {
    let h = Harness::new();
    h.write("VAR1", "7").await;
    assert_eq!(h.stored("var1").await.as_deref(), Some("7"));
    assert_eq!(h.read("Var1").await.result, "7");
}

// ═══════════════════════════════════════════════════════════════════════════
// REJECTION TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_invalid_formula_is_rejected() {
    let h = Harness::new();
    for formula in ["=1+", "=1/0", "=missing", "=FOO(1)", "=1 +* 2"] {
        let outcome = h.write("bad", formula).await;
        assert!(!outcome.is_committed(), "{} should be rejected", formula);
        assert_eq!(outcome.response().value, formula);
        assert_eq!(outcome.response().result, ERROR_RESULT);
        assert!(outcome.response().error.is_some());
    }
    assert_eq!(h.stored("bad").await, None);
}

#[tokio::test]
async fn test_write_breaking_dependent_leaves_store_unchanged() {
    let h = Harness::new();
    h.write("var1", "1").await;
    h.write("var2", "=var1+1").await;

    let outcome = h.write("var1", "Some string").await;
    assert!(!outcome.is_committed());
    assert_eq!(outcome.response().value, "Some string");
    assert_eq!(outcome.response().result, ERROR_RESULT);

    assert_eq!(h.stored("var1").await.as_deref(), Some("1"));
    assert_eq!(h.read("var2").await.result, "2");
    assert_eq!(h.dependents("var1").await, set(&["var2"]));
}

#[tokio::test]
async fn test_write_breaking_transitive_dependent_is_rejected() {
    let h = Harness::new();
    h.write("a", "1").await;
    h.write("b", "=a").await;
    h.write("c", "=b*2").await;
    h.write("d", "=1/(c-4)").await;

    let outcome = h.write("a", "2").await;
    assert!(!outcome.is_committed());
    let message = outcome.response().error.clone().unwrap();
    assert!(message.contains("'d'"), "{}", message);
    assert_eq!(h.stored("a").await.as_deref(), Some("1"));
}

#[tokio::test]
async fn test_write_introducing_cycle_is_rejected() {
    let h = Harness::new();
    h.write("a", "1").await;
    h.write("b", "=a+1").await;
    h.write("c", "=b+1").await;

    let outcome = h.write("a", "=c").await;
    assert!(!outcome.is_committed());
    assert!(outcome.response().error.clone().unwrap().contains("cycle"));
    assert_eq!(h.stored("a").await.as_deref(), Some("1"));

    let outcome = h.write("x", "=x").await;
    assert!(!outcome.is_committed());
    assert_eq!(h.stored("x").await, None);
}

#[tokio::test]
async fn test_deep_formula_write_is_rejected() {
    let h = Harness::new();
    let formula = format!("={}1{}", "(".repeat(10_000), ")".repeat(10_000));
    let outcome = h.write("a", &formula).await;
    assert!(!outcome.is_committed());
    assert_eq!(outcome.response().result, ERROR_RESULT);
    assert_eq!(h.stored("a").await, None);
}

#[tokio::test]
async fn test_reference_chain_cannot_grow_without_bound() {
    let h = Harness::new();
    h.write("c0", "1").await;

    let mut first_rejected = None;
    for i in 1..=300 {
        let outcome = h.write(&format!("c{}", i), &format!("=c{}", i - 1)).await;
        if !outcome.is_committed() {
            first_rejected = Some(i);
            break;
        }
    }

    let first_rejected = first_rejected.unwrap();
    assert!(first_rejected > 200, "rejected at c{}", first_rejected);
    assert_eq!(h.read("c200").await.result, "1");
}

// ═══════════════════════════════════════════════════════════════════════════
// EDGE TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_edges_follow_formula_references() {
    let h = Harness::new();
    h.write("a", "1").await;
    h.write("b", "2").await;
    h.write("c", "=SUM(A, b, 3)").await;

    assert_eq!(h.dependents("a").await, set(&["c"]));
    assert_eq!(h.dependents("b").await, set(&["c"]));
    // Function names are identifier-shaped and picked up as well.
    assert_eq!(h.dependents("sum").await, set(&["c"]));
}

#[tokio::test]
async fn test_replaced_formula_drops_old_edges() {
    let h = Harness::new();
    h.write("a", "1").await;
    h.write("b", "2").await;
    h.write("c", "=a").await;
    h.write("c", "=b").await;

    assert_eq!(h.dependents("a").await, set(&[]));
    assert_eq!(h.dependents("b").await, set(&["c"]));

    // a no longer feeds c, so a may become text
    assert!(h.write("a", "text").await.is_committed());
}

#[tokio::test]
async fn test_rejected_write_keeps_edges() {
    let h = Harness::new();
    h.write("a", "1").await;
    h.write("b", "=a").await;
    h.write("b", "=missing").await;
    assert_eq!(h.dependents("a").await, set(&["b"]));
    assert_eq!(h.dependents("missing").await, set(&[]));
}

// ═══════════════════════════════════════════════════════════════════════════
// NOTIFICATION TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_subscribers_receive_recomputed_values() {
    let h = Harness::new();
    h.write("a", "1").await;
    h.write("b", "=a+1").await;
    h.write("c", "=b*2").await;

    let id = h
        .engine
        .create_subscription(SHEET, "c", &h.cancel)
        .await
        .unwrap();
    let mut feed = h.engine.open_subscription(&id, &h.cancel).await.unwrap();

    h.write("a", "10").await;
    let update = timeout(Duration::from_secs(5), feed.next_update())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(update, CellResponse::new("=b*2", "22"));
}

#[tokio::test]
async fn test_rejected_write_does_not_notify() {
    let h = Harness::new();
    h.write("a", "1").await;
    h.write("b", "=a+1").await;

    let id = h
        .engine
        .create_subscription(SHEET, "b", &h.cancel)
        .await
        .unwrap();
    let mut feed = h.engine.open_subscription(&id, &h.cancel).await.unwrap();

    h.write("a", "text").await;
    let waited = timeout(Duration::from_millis(100), feed.next_update()).await;
    assert!(waited.is_err());
}

#[tokio::test]
async fn test_notification_survives_dependents_cycle() {
    let h = Harness::new();
    // A cyclic dependents graph can only come from concurrent writes; build it directly.
    h.store.set_cell(SHEET, "a", "1").await.unwrap();
    h.store.set_cell(SHEET, "b", "2").await.unwrap();
    h.store
        .add_dependents(SHEET, "a", &["b".to_string()])
        .await
        .unwrap();
    h.store
        .add_dependents(SHEET, "b", &["a".to_string()])
        .await
        .unwrap();

    let outcome = timeout(Duration::from_secs(5), h.write("a", "3")).await.unwrap();
    assert!(outcome.is_committed());
}
