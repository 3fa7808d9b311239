//! End-to-end cases that need a local Chrome. Ignored by default; run with
//! `cargo test -- --ignored`.

use pagepilot::browser::InteractionExecutor;
use pagepilot::{
    AutomationConfig, BrowserSession, DomScriptHost, DomSnapshotBuilder, LaunchOptions,
    NetworkIdleMonitor, PageController,
};
use std::sync::Arc;

fn launch() -> BrowserSession {
    let _ = env_logger::builder().is_test(true).try_init();
    BrowserSession::launch(LaunchOptions::new().headless(true)).expect("failed to launch browser")
}

fn navigate_to_html(session: &BrowserSession, html: &str) {
    let tab = session.active_tab().expect("no active tab");
    tab.navigate_to(&format!("data:text/html,{html}"))
        .expect("navigation failed");
    tab.wait_until_navigated().expect("navigation never settled");
    std::thread::sleep(std::time::Duration::from_millis(300));
}

#[tokio::test]
#[ignore] // requires Chrome
async fn snapshot_indexes_interactive_elements() {
    let session = launch();
    navigate_to_html(
        &session,
        "<html><body>\
         <button id='go'>Go</button>\
         <a href='/next'>Next</a>\
         <p>plain text</p>\
         </body></html>",
    );

    let tab = session.active_tab().unwrap();
    let builder = DomSnapshotBuilder::new(&AutomationConfig::default());
    let (tree, map) = builder.capture(&tab, None).await.expect("capture failed");

    assert!(map.len() >= 2, "expected button and link to be indexed");
    for (index, id) in map.iter() {
        let element = tree.element(id).expect("map entry must resolve");
        assert_eq!(element.highlight_index, Some(index));
    }
}

#[tokio::test]
#[ignore]
async fn click_by_index_follows_the_ladder() {
    let session = launch();
    navigate_to_html(
        &session,
        "<html><body>\
         <button id='counter' onclick='this.textContent = \"clicked\"'>press</button>\
         </body></html>",
    );

    let tab = session.active_tab().unwrap();
    let builder = DomSnapshotBuilder::new(&AutomationConfig::default());
    let (tree, map) = builder.capture(&tab, None).await.expect("capture failed");
    let id = map.get(0).expect("button should be indexed");

    let monitor = NetworkIdleMonitor::new();
    let executor = InteractionExecutor::new(
        Arc::clone(&tab),
        true,
        Arc::new(DomScriptHost::new(Arc::clone(&tab))),
        monitor,
    );
    executor.click(&tree, id).await.expect("click failed");

    let text = tab
        .evaluate("document.getElementById('counter').textContent", false)
        .unwrap()
        .value
        .unwrap();
    assert_eq!(text.as_str(), Some("clicked"));
}

#[tokio::test]
#[ignore]
async fn dropdown_selection_and_option_listing() {
    let session = launch();
    navigate_to_html(
        &session,
        "<html><body>\
         <select id='fruit'>\
         <option value='a'>Apple</option>\
         <option value='b'>Banana</option>\
         </select>\
         </body></html>",
    );

    let tab = session.active_tab().unwrap();
    let builder = DomSnapshotBuilder::new(&AutomationConfig::default());
    let (tree, map) = builder.capture(&tab, None).await.expect("capture failed");
    let id = map.get(0).expect("select should be indexed");

    let monitor = NetworkIdleMonitor::new();
    let executor = InteractionExecutor::new(
        Arc::clone(&tab),
        true,
        Arc::new(DomScriptHost::new(Arc::clone(&tab))),
        monitor,
    );

    let options = executor
        .get_dropdown_options(&tree, id)
        .await
        .expect("options failed");
    assert_eq!(options.len(), 2);
    assert_eq!(options[0].text, "Apple");

    let selection = executor
        .select_dropdown_option(&tree, id, "Banana")
        .await
        .expect("selection failed");
    assert!(selection.found);

    let missing = executor
        .select_dropdown_option(&tree, id, "Cherry")
        .await
        .expect("absent option must not raise");
    assert!(!missing.found);
    assert_eq!(missing.available, vec!["Apple", "Banana"]);
}

#[tokio::test]
#[ignore]
async fn scroll_to_text_finds_case_insensitive_matches() {
    let session = launch();
    navigate_to_html(
        &session,
        "<html><body>\
         <div style='height: 3000px'>spacer</div>\
         <p>The Hidden Paragraph</p>\
         </body></html>",
    );

    let tab = session.active_tab().unwrap();
    let monitor = NetworkIdleMonitor::new();
    let executor = InteractionExecutor::new(
        Arc::clone(&tab),
        true,
        Arc::new(DomScriptHost::new(Arc::clone(&tab))),
        monitor,
    );

    assert!(executor.scroll_to_text("hidden paragraph").await.unwrap());
    assert!(!executor.scroll_to_text("no such text anywhere").await.unwrap());
}

#[tokio::test]
#[ignore]
async fn controller_returns_placeholder_for_non_http_target() {
    let session = launch();
    navigate_to_html(&session, "<html><body><p>internal</p></body></html>");

    let mut page = PageController::new(session, AutomationConfig::default());
    page.attach().await.expect("attach failed");

    // data: documents are not automatable targets.
    let state = page.get_state(false).await.expect("get_state must not raise");
    assert!(state.is_placeholder());
}

#[tokio::test]
#[ignore]
async fn controller_end_to_end_against_live_site() {
    let session = launch();
    let mut page = PageController::new(session, AutomationConfig::default());
    page.attach().await.expect("attach failed");
    page.navigate("https://example.com").await.expect("navigate failed");

    let state = page.get_state(true).await.expect("get_state failed");
    assert!(!state.is_placeholder());
    assert!(state.url.starts_with("https://example.com"));
    assert!(state.screenshot.is_some());
    assert!(!state.interactive_elements_summary().is_empty());

    let markdown = page.extract_markdown().await.expect("markdown failed");
    assert!(markdown.to_lowercase().contains("example"));
}
