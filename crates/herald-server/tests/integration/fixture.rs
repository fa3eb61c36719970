use std::time::Duration;

use axum::Router;
use axum::extract::Path;
use axum::response::Html;
use axum::routing::get;
use tokio::net::TcpListener;

const PARAGRAPH: &str = "The regional water board voted on Tuesday to delay the dam expansion \
    by a year, citing unresolved questions about downstream habitat. Board members said the \
    study commissioned last spring had not addressed sediment flows, and residents who packed \
    the hearing room applauded the decision.";

async fn listing() -> Html<&'static str> {
    Html(
        r#"<html><body>
          <article><h2><a href="/articles/dam">Dam vote delayed</a></h2></article>
          <article><h2><a href="/articles/bridge">Bridge closes</a></h2></article>
          <footer><a href="/about">About</a></footer>
        </body></html>"#,
    )
}

async fn article(Path(slug): Path<String>) -> Html<String> {
    Html(format!(
        "<html><body><h1>Story about the {slug}</h1>\
         <article><p>{slug}: {PARAGRAPH}</p><p>{PARAGRAPH}</p></article></body></html>"
    ))
}

async fn slow_article() -> Html<String> {
    tokio::time::sleep(Duration::from_secs(5)).await;
    article(Path("slow".to_string())).await
}

async fn slow_listing() -> Html<&'static str> {
    Html(r#"<article><a href="/slow/one">One</a><a href="/slow/two">Two</a></article>"#)
}

/// Serves a small news site on an ephemeral local port and returns its base URL.
pub async fn spawn_site() -> String {
    let app = Router::new()
        .route("/news", get(listing))
        .route("/articles/{slug}", get(article))
        .route("/slow-news", get(slow_listing))
        .route("/slow/{slug}", get(slow_article));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    base
}
