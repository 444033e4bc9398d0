//! Knowledge catalog and retrieval integration tests.

mod common;

use std::sync::Arc;

use anyhow::Result;
use common::{DIMENSIONS, TestDomain};
use concierge_domain::{DomainConfig, DomainError, KnowledgeDraft, KnowledgeService, SearchMode};
use concierge_llm::{MockBackend, MockEmbedder};
use concierge_memory::{
    InMemoryVectorIndex, KnowledgeStore, SharedVectorIndex, SqliteStore, SqliteVectorIndex,
    VectorIndex,
};

fn ids(hits: &[concierge_domain::ScoredEntry]) -> Vec<String> {
    hits.iter().map(|h| h.entry.title.clone()).collect()
}

#[tokio::test]
async fn test_hybrid_without_vectors_matches_keyword() -> Result<()> {
    let domain = TestDomain::new(MockBackend::echo());
    let knowledge = domain.services.knowledge();
    knowledge
        .create(KnowledgeDraft::new("Shipping times", "Orders ship in two days."))
        .await?;
    knowledge
        .create(KnowledgeDraft::new("Returns", "Return shipping is free."))
        .await?;

    let retrieval = domain.services.retrieval();
    let hybrid = retrieval.search("shipping", 5, SearchMode::Hybrid).await?;
    let keyword = retrieval.search("shipping", 5, SearchMode::Keyword).await?;
    assert_eq!(hybrid, keyword);
    assert_eq!(ids(&hybrid), vec!["Shipping times", "Returns"]);
    Ok(())
}

#[tokio::test]
async fn test_empty_catalog_returns_nothing() -> Result<()> {
    let domain = TestDomain::with_vectors(MockBackend::echo(), DomainConfig::default());
    let retrieval = domain.services.retrieval();
    for mode in [SearchMode::Vector, SearchMode::Keyword, SearchMode::Hybrid] {
        assert!(retrieval.search("anything", 3, mode).await?.is_empty());
    }
    Ok(())
}

#[tokio::test]
async fn test_vector_mode_requires_capability() {
    let domain = TestDomain::new(MockBackend::echo());
    let err = domain
        .services
        .retrieval()
        .search("anything", 3, SearchMode::Vector)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Retrieval(_)));
}

#[tokio::test]
async fn test_title_match_outranks_body_match() -> Result<()> {
    let domain = TestDomain::new(MockBackend::echo());
    let knowledge = domain.services.knowledge();
    knowledge
        .create(KnowledgeDraft::new("General help", "Ask us about warranty terms."))
        .await?;
    knowledge
        .create(KnowledgeDraft::new("Warranty", "Two years on all devices."))
        .await?;
    knowledge
        .create(KnowledgeDraft::new("Unrelated", "Nothing to see here."))
        .await?;

    let hits = domain
        .services
        .retrieval()
        .search("warranty", 3, SearchMode::Keyword)
        .await?;
    assert_eq!(ids(&hits), vec!["Warranty", "General help"]);
    assert!(hits[0].score > hits[1].score);
    Ok(())
}

#[tokio::test]
async fn test_cjk_queries_match_without_spaces() -> Result<()> {
    let domain = TestDomain::new(MockBackend::echo());
    domain
        .services
        .knowledge()
        .create(KnowledgeDraft::new("退货政策", "七天无理由退货"))
        .await?;

    let hits = domain
        .services
        .retrieval()
        .search("我想退货", 3, SearchMode::Keyword)
        .await?;
    assert_eq!(ids(&hits), vec!["退货政策"]);
    Ok(())
}

#[tokio::test]
async fn test_vector_search_follows_updates() -> Result<()> {
    let domain = TestDomain::with_vectors(MockBackend::echo(), DomainConfig::default());
    let knowledge = domain.services.knowledge();
    let target = knowledge
        .create(KnowledgeDraft::new("Opening hours", "Nine to five."))
        .await?;
    knowledge
        .create(KnowledgeDraft::new("Contact", "Call us anytime."))
        .await?;

    let updated = knowledge
        .update(target.id, KnowledgeDraft::new("Opening hours", "Eight to eight."))
        .await?;

    let hits = domain
        .services
        .retrieval()
        .search(&updated.document(), 1, SearchMode::Vector)
        .await?;
    assert_eq!(hits[0].entry.id, target.id);
    assert_eq!(hits[0].entry.body, "Eight to eight.");
    assert!(hits[0].score > 0.99);

    let all = domain
        .services
        .retrieval()
        .search(&updated.document(), 10, SearchMode::Vector)
        .await?;
    assert_eq!(all.len(), 2);
    Ok(())
}

/// Update one entry and check that no other entry's vector moved.
async fn check_update_touches_only_target(index: SharedVectorIndex) -> Result<()> {
    let store = Arc::new(SqliteStore::open_in_memory()?);
    let knowledge = KnowledgeService::new(store)
        .with_vectors(Arc::new(MockEmbedder::new(DIMENSIONS)), index.clone());

    let mut entries = Vec::new();
    for (title, body) in [
        ("Opening hours", "Nine to five."),
        ("Contact", "Call us anytime."),
        ("Returns", "Thirty days."),
        ("Shipping", "Two business days."),
    ] {
        entries.push(knowledge.create(KnowledgeDraft::new(title, body)).await?);
    }
    let target = entries[0].id;

    let before: Vec<_> = entries
        .iter()
        .map(|e| index.get(e.id).map(|v| v.expect("indexed")))
        .collect::<std::result::Result<_, _>>()?;

    knowledge
        .update(target, KnowledgeDraft::new("Opening hours", "Eight to eight."))
        .await?;

    for old in &before {
        let now = index.get(old.id)?.expect("still indexed");
        if old.id == target {
            assert_ne!(now.vector, old.vector);
        } else {
            assert_eq!(&now, old);
        }
    }
    assert_eq!(index.len()?, entries.len());
    Ok(())
}

#[tokio::test]
async fn test_update_isolation_in_memory_index() -> Result<()> {
    check_update_touches_only_target(Arc::new(InMemoryVectorIndex::new(DIMENSIONS))).await
}

#[tokio::test]
async fn test_update_isolation_sqlite_index() -> Result<()> {
    check_update_touches_only_target(Arc::new(SqliteVectorIndex::open_in_memory(DIMENSIONS)?))
        .await
}

#[tokio::test]
async fn test_deleted_entries_leave_vector_results() -> Result<()> {
    let domain = TestDomain::with_vectors(MockBackend::echo(), DomainConfig::default());
    let knowledge = domain.services.knowledge();
    let gone = knowledge
        .create(KnowledgeDraft::new("Old promo", "Spring sale."))
        .await?;
    knowledge
        .create(KnowledgeDraft::new("Current promo", "Autumn sale."))
        .await?;

    assert!(knowledge.delete(gone.id).await?);
    assert!(matches!(knowledge.get(gone.id), Err(DomainError::NotFound(_))));

    let hits = domain
        .services
        .retrieval()
        .search(&gone.document(), 10, SearchMode::Vector)
        .await?;
    assert!(hits.iter().all(|h| h.entry.id != gone.id));
    assert_eq!(hits.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_stale_vectors_do_not_shrink_results() -> Result<()> {
    let domain = TestDomain::with_vectors(MockBackend::echo(), DomainConfig::default());
    let knowledge = domain.services.knowledge();
    let mut created = Vec::new();
    for (title, body) in [
        ("Gift cards", "Gift cards never expire."),
        ("Gift wrap", "Gift wrapping is free."),
        ("Gift receipts", "Ask for a gift receipt."),
        ("Gift limits", "Up to five gift cards per order."),
    ] {
        created.push(knowledge.create(KnowledgeDraft::new(title, body)).await?);
    }

    // Removed behind the service, so their vectors stay in the index.
    domain.store.delete_entry(created[0].id)?;
    domain.store.delete_entry(created[1].id)?;

    let hits = domain
        .services
        .retrieval()
        .search(&created[0].document(), 2, SearchMode::Vector)
        .await?;
    assert_eq!(hits.len(), 2);
    assert!(hits.iter().all(|h| h.entry.id != created[0].id && h.entry.id != created[1].id));
    Ok(())
}

#[tokio::test]
async fn test_resync_indexes_entries_written_behind_the_service() -> Result<()> {
    let domain = TestDomain::with_vectors(MockBackend::echo(), DomainConfig::default());
    for i in 0..40 {
        domain
            .store
            .insert_entry(KnowledgeDraft::new(format!("Entry {}", i), "body"))?;
    }

    let report = domain.services.knowledge().resync().await?;
    assert_eq!(report.entries, 40);
    assert_eq!(report.indexed, 40);
    assert_eq!(report.to_string(), "40/40 entries indexed");

    let hits = domain
        .services
        .retrieval()
        .search("Entry 7\nbody", 1, SearchMode::Vector)
        .await?;
    assert_eq!(hits[0].entry.title, "Entry 7");
    Ok(())
}

#[tokio::test]
async fn test_resync_requires_vector_capability() {
    let domain = TestDomain::new(MockBackend::echo());
    let err = domain.services.knowledge().resync().await.unwrap_err();
    assert!(matches!(err, DomainError::Retrieval(_)));
}

#[tokio::test]
async fn test_seed_defaults_only_fills_an_empty_catalog() -> Result<()> {
    let domain = TestDomain::with_vectors(MockBackend::echo(), DomainConfig::default());
    let knowledge = domain.services.knowledge();

    let seeded = knowledge.seed_defaults().await?;
    assert_eq!(seeded, concierge_domain::default_entries().len());
    assert_eq!(knowledge.seed_defaults().await?, 0);
    assert_eq!(knowledge.count()?, seeded);
    Ok(())
}

#[tokio::test]
async fn test_invalid_drafts_are_rejected() {
    let domain = TestDomain::new(MockBackend::echo());
    let err = domain
        .services
        .knowledge()
        .create(KnowledgeDraft::new("   ", "body"))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Validation(_)));
    assert_eq!(domain.services.knowledge().count().unwrap(), 0);
}
