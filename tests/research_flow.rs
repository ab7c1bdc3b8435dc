//! End-to-end research turns over scripted collaborators and the
//! in-memory collection store.

mod common;

use std::sync::Arc;

use common::{as_strs, links, DownSearch, Harness};
use research_harness::prompts::{COMBINE_REPORTS, ITERATE_REPORT, WRITE_REPORT};
use research_harness::research::{
    capped_steps_note, ResearchController, INVALID_COMBINE_MSG, NO_INITIAL_SOURCES_MSG, NO_MORE_SOURCES_MSG,
    NO_NEW_SOURCES_MSG, NO_REPORT_MSG,
};
use research_harness::services::Services;
use research_harness_core::command::{ResearchCommand, ViewTarget, USAGE};
use research_harness_core::error::ResearchError;
use research_harness_core::report::ReportId;
use research_harness_core::store::CollectionStore;

const QUERY: &str = "best hiking trails Colorado";
const COLLECTION: &str = "rr-best-hiking-trails-colorado";

fn new_cmd() -> ResearchCommand {
    ResearchCommand::New {
        query: QUERY.to_string(),
        report_type: None,
    }
}

fn harness(n: usize, bad: &[usize]) -> Harness {
    let links = links("trails.test", n, bad);
    Harness::new(&["colorado hiking trails", "best hikes colorado"], &as_strs(&links))
}

#[tokio::test]
async fn test_new_writes_first_report_from_seven_sources() {
    let h = harness(10, &[2, 5, 9]);
    let reply = h.research().handle(None, new_cmd()).await.unwrap();

    assert_eq!(reply.collection.as_deref(), Some(COLLECTION));
    assert_eq!(reply.links.len(), 7);
    assert!(reply.links.iter().all(|l| !l.contains("bad")));
    assert!(reply.text.starts_with("## Report 0\n\nReport text 1."));
    assert!(reply.text.contains("### Sources\n- https://trails.test/1\n"));
    assert_eq!(h.search.queries(), vec!["colorado hiking trails", "best hikes colorado"]);

    let state = h.research_state(COLLECTION).await;
    assert_eq!(state.query, QUERY);
    assert_eq!(state.report_type, "a ranked list");
    assert_eq!(state.base_reports.len(), 1);
    assert_eq!(state.base_reports[0].sources, reply.links);
    assert_eq!(
        state.base_reports[0].evaluation.as_deref(),
        Some("covers the sources well")
    );
    assert_eq!(state.main_report_id, Some(ReportId::Base(0)));
    assert_eq!(state.processed_links.len(), 10);
    assert!(state.unprocessed_links.is_empty());
    assert!(state.link_data["https://bad.trails.test/2"].error.is_some());

    assert!(h.store.chunks(COLLECTION).unwrap().len() >= 7);
}

#[tokio::test]
async fn test_explicit_report_type_wins_over_plan() {
    let h = harness(8, &[]);
    let cmd = ResearchCommand::New {
        query: QUERY.to_string(),
        report_type: Some("a comparison table".to_string()),
    };
    h.research().handle(None, cmd).await.unwrap();
    let state = h.research_state(COLLECTION).await;
    assert_eq!(state.report_type, "a comparison table");
    assert!(h.llm.prompts().iter().any(|p| p.contains("a comparison table")));
}

#[tokio::test]
async fn test_iterate_without_new_links_leaves_report_alone() {
    let h = harness(7, &[]);
    let research = h.research();
    research.handle(None, new_cmd()).await.unwrap();
    let before = h.research_state(COLLECTION).await;

    let reply = research
        .handle(Some(COLLECTION), ResearchCommand::Iterate { num_iterations: 1 })
        .await
        .unwrap();
    assert_eq!(reply.text, NO_MORE_SOURCES_MSG);
    assert_eq!(reply.collection.as_deref(), Some(COLLECTION));

    let after = h.research_state(COLLECTION).await;
    assert_eq!(after.base_reports, before.base_reports);
    assert_eq!(h.llm.count(&ITERATE_REPORT), 0);
}

#[tokio::test]
async fn test_combine_with_one_report_is_guidance() {
    let h = harness(7, &[]);
    let research = h.research();
    research.handle(None, new_cmd()).await.unwrap();
    let before = h.store.get_metadata(COLLECTION).await.unwrap();

    let reply = research
        .handle(Some(COLLECTION), ResearchCommand::Combine { num_iterations: 1 })
        .await
        .unwrap();
    assert_eq!(reply.text, INVALID_COMBINE_MSG);
    assert_eq!(h.store.get_metadata(COLLECTION).await.unwrap(), before);
    assert_eq!(h.llm.count(&COMBINE_REPORTS), 0);
}

#[tokio::test]
async fn test_iterate_rewrites_active_report_with_new_sources() {
    let h = harness(10, &[]);
    let research = h.research();
    research.handle(None, new_cmd()).await.unwrap();

    let reply = research
        .handle(Some(COLLECTION), ResearchCommand::Iterate { num_iterations: 1 })
        .await
        .unwrap();
    assert_eq!(reply.links, vec!["https://trails.test/8", "https://trails.test/9"]);

    let state = h.research_state(COLLECTION).await;
    assert_eq!(state.base_reports.len(), 1);
    let report = &state.base_reports[0];
    assert_eq!(report.text, "Improved report 2.");
    assert_eq!(report.sources.len(), 9);
    assert!(report
        .evaluation
        .as_deref()
        .is_some_and(|e| e.contains("thin on detail")));
    assert_eq!(state.unprocessed_links, vec!["https://trails.test/10"]);
}

#[tokio::test]
async fn test_more_then_combine_makes_combined_main_report() {
    let h = harness(20, &[]);
    let research = h.research();
    research.handle(None, new_cmd()).await.unwrap();
    research
        .handle(Some(COLLECTION), ResearchCommand::More { num_iterations: 1 })
        .await
        .unwrap();

    let reply = research
        .handle(Some(COLLECTION), ResearchCommand::Combine { num_iterations: 1 })
        .await
        .unwrap();
    assert!(reply
        .text
        .starts_with("Combined reports 0 + 1 into report c0, now the main report."));
    assert_eq!(reply.links.len(), 14);

    let state = h.research_state(COLLECTION).await;
    assert_eq!(state.base_reports.len(), 2);
    assert_eq!(state.combined_reports.len(), 1);
    assert_eq!(state.main_report_id, Some(ReportId::Combined(0)));
    assert_eq!(state.base_reports[0].child_id, Some(ReportId::Combined(0)));
    assert_eq!(state.combined_report_id_levels, vec![vec![ReportId::Combined(0)]]);
}

#[tokio::test]
async fn test_auto_and_deeper_grow_the_tree() {
    let h = harness(30, &[]);
    let research = h.research();
    research.handle(None, new_cmd()).await.unwrap();

    // more, combine, more
    research
        .handle(Some(COLLECTION), ResearchCommand::Auto { num_iterations: 3 })
        .await
        .unwrap();
    let state = h.research_state(COLLECTION).await;
    assert_eq!(state.base_reports.len(), 3);
    assert_eq!(state.combined_reports.len(), 1);
    assert_eq!(state.num_levels(), 1);

    // more, combine 2+3, combine c0+c1 into a new level
    let reply = research
        .handle(Some(COLLECTION), ResearchCommand::Deeper)
        .await
        .unwrap();
    assert!(
        reply.text.starts_with("Reached combination level 2 after 3 steps."),
        "{}",
        reply.text
    );
    let state = h.research_state(COLLECTION).await;
    assert_eq!(state.base_reports.len(), 4);
    assert_eq!(state.combined_reports.len(), 3);
    assert_eq!(state.main_report_id, Some(ReportId::Combined(2)));
    assert_eq!(state.combined_reports[2].parent_ids, vec![ReportId::Combined(0), ReportId::Combined(1)]);
    assert_eq!(h.llm.count(&WRITE_REPORT), 4);
}

#[tokio::test]
async fn test_step_count_capped_per_turn() {
    let mut h = harness(40, &[]);
    h.config.research.max_auto_iterations = 2;
    let research = h.research();
    research.handle(None, new_cmd()).await.unwrap();

    let reply = research
        .handle(Some(COLLECTION), ResearchCommand::More { num_iterations: 6 })
        .await
        .unwrap();
    assert!(
        reply.text.starts_with(&capped_steps_note(6, 2)),
        "{}",
        reply.text
    );
    let state = h.research_state(COLLECTION).await;
    assert_eq!(state.base_reports.len(), 3);
    assert_eq!(h.llm.count(&WRITE_REPORT), 3);

    // within the cap, no note
    let reply = research
        .handle(Some(COLLECTION), ResearchCommand::More { num_iterations: 1 })
        .await
        .unwrap();
    assert!(reply.text.starts_with("## Report 3"), "{}", reply.text);
}

#[tokio::test]
async fn test_more_stops_early_when_sources_run_out() {
    let h = harness(10, &[]);
    let research = h.research();
    research.handle(None, new_cmd()).await.unwrap();

    let reply = research
        .handle(Some(COLLECTION), ResearchCommand::More { num_iterations: 3 })
        .await
        .unwrap();
    assert!(reply.text.starts_with("## Report 1"));
    assert!(reply.text.ends_with(NO_NEW_SOURCES_MSG));
    assert_eq!(reply.links.len(), 3);

    let state = h.research_state(COLLECTION).await;
    assert_eq!(state.base_reports.len(), 2);
    assert_eq!(state.active_base_report, Some(1));
    assert_eq!(state.main_report_id, Some(ReportId::Base(0)));
}

#[tokio::test]
async fn test_view_renders_reports_and_stats() {
    let h = harness(14, &[]);
    let research = h.research();
    research.handle(None, new_cmd()).await.unwrap();
    research
        .handle(Some(COLLECTION), ResearchCommand::More { num_iterations: 1 })
        .await
        .unwrap();

    let view = |target| ResearchCommand::View { target };
    let stats = research
        .handle(Some(COLLECTION), view(ViewTarget::Stats))
        .await
        .unwrap();
    assert!(stats.text.contains("Base reports: 2"));
    assert!(stats.text.contains("Main report: 0"));
    assert!(!stats.text.contains("## Report"));

    let base = research
        .handle(Some(COLLECTION), view(ViewTarget::Base))
        .await
        .unwrap();
    assert!(base.text.contains("## Report 0"));
    assert!(base.text.contains("## Report 1"));

    let combined = research
        .handle(Some(COLLECTION), view(ViewTarget::Combined))
        .await
        .unwrap();
    assert!(combined.text.contains("No combined reports yet."));
}

#[tokio::test]
async fn test_setters_update_state() {
    let h = harness(7, &[]);
    let research = h.research();
    research.handle(None, new_cmd()).await.unwrap();

    research
        .handle(
            Some(COLLECTION),
            ResearchCommand::SetQuery {
                query: "  quiet trails near Denver ".to_string(),
            },
        )
        .await
        .unwrap();
    research
        .handle(
            Some(COLLECTION),
            ResearchCommand::SetReportType {
                report_type: "a short list".to_string(),
            },
        )
        .await
        .unwrap();
    h.search.set_for_query(
        "denver trails",
        &["https://trails.test/1", "https://denver.test/a", "https://denver.test/b"],
    );
    let reply = research
        .handle(
            Some(COLLECTION),
            ResearchCommand::SetSearchQueries {
                queries: vec!["denver trails".to_string(), " denver trails ".to_string()],
            },
        )
        .await
        .unwrap();
    assert!(reply.text.contains("added 2 new links"), "{}", reply.text);

    let state = h.research_state(COLLECTION).await;
    assert_eq!(state.query, "quiet trails near Denver");
    assert_eq!(state.report_type, "a short list");
    assert_eq!(state.search_queries, vec!["denver trails"]);
    assert_eq!(
        state.unprocessed_links,
        vec!["https://denver.test/a", "https://denver.test/b"]
    );
}

#[tokio::test]
async fn test_commands_without_a_session_get_guidance() {
    let h = harness(7, &[]);
    let research = h.research();

    let reply = research
        .handle(None, ResearchCommand::More { num_iterations: 1 })
        .await
        .unwrap();
    assert_eq!(reply.text, NO_REPORT_MSG);

    let reply = research
        .handle(Some("rr-missing"), ResearchCommand::Deeper)
        .await
        .unwrap();
    assert_eq!(reply.text, NO_REPORT_MSG);
    assert!(!h.store.exists("rr-missing").await.unwrap());

    let reply = research.handle(None, ResearchCommand::None).await.unwrap();
    assert_eq!(reply.text, USAGE);
    assert!(h.llm.prompts().is_empty());
}

#[tokio::test]
async fn test_new_without_usable_sources_keeps_session_for_new_searches() {
    let h = harness(5, &[1, 2, 3, 4, 5]);
    let research = h.research();
    let reply = research.handle(None, new_cmd()).await.unwrap();
    assert_eq!(reply.text, NO_INITIAL_SOURCES_MSG);
    assert_eq!(reply.collection.as_deref(), Some(COLLECTION));
    assert!(h.research_state(COLLECTION).await.base_reports.is_empty());

    h.search.set_default(&["https://good.test/1", "https://good.test/2"]);
    research
        .handle(
            Some(COLLECTION),
            ResearchCommand::SetSearchQueries {
                queries: vec!["colorado trail guide".to_string()],
            },
        )
        .await
        .unwrap();
    let reply = research
        .handle(Some(COLLECTION), ResearchCommand::More { num_iterations: 1 })
        .await
        .unwrap();
    assert_eq!(reply.links, vec!["https://good.test/1", "https://good.test/2"]);

    let state = h.research_state(COLLECTION).await;
    assert_eq!(state.main_report_id, Some(ReportId::Base(0)));
}

#[tokio::test]
async fn test_second_new_gets_numbered_collection() {
    let h = harness(14, &[]);
    let research = h.research();
    research.handle(None, new_cmd()).await.unwrap();
    let reply = research.handle(None, new_cmd()).await.unwrap();
    assert_eq!(reply.collection.as_deref(), Some("rr-best-hiking-trails-colorado-2"));
}

#[tokio::test]
async fn test_search_failure_is_upstream_error() {
    let h = harness(7, &[]);
    let services = Services::new(
        h.llm.clone(),
        Arc::new(DownSearch),
        h.fetcher.clone(),
        h.store.clone(),
    );
    let research = ResearchController::new(services, &h.config);
    let err = research.handle(None, new_cmd()).await.unwrap_err();
    assert!(matches!(err, ResearchError::Upstream { .. }));
    assert!(err.user_message().contains("web search"));
    assert!(!err.is_fatal());
    assert!(h.store.list().await.unwrap().is_empty());
}
