//! End-to-end tests for the embedding pipeline.

mod common;

use std::collections::HashMap;
use std::path::Path;

use assert_fs::prelude::*;
use predicates::prelude::*;

use embedmail::config::{EmbedOptions, MissingPolicy};
use embedmail::embed::{Embedder, SkipReason};
use embedmail::model::message::MailMessage;
use embedmail::parser::eml::{parse_eml, parse_message};

use common::{cids_in, html_message, http_response, options, png_bytes, CannedServer};

async fn embed(options: EmbedOptions, dir: &Path, eml: &str) -> MailMessage {
    let input = dir.join("a.eml");
    std::fs::write(&input, eml).unwrap();
    let embedder = Embedder::new(options).unwrap();
    let report = embedder.embed_file(&input).await.unwrap();
    assert_eq!(report.output, dir.join("a.embed.eml"));
    parse_eml(&report.output).unwrap()
}

fn html_of(message: &MailMessage) -> &str {
    message.html.as_deref().expect("html body")
}

// ─── Two references to one URL share one attachment ────────────────

#[tokio::test]
async fn test_duplicate_references_share_one_cid() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/1.png")
        .with_header("content-type", "image/png")
        .with_body(png_bytes(24))
        .expect(1)
        .create_async()
        .await;
    let url = format!("{}/1.png", server.url());

    let tmp = tempfile::tempdir().unwrap();
    let eml = html_message(&format!(r#"<img src="{url}"><img src="{url}">"#), &[]);
    let out = embed(options(tmp.path()), tmp.path(), &eml).await;

    let cids = cids_in(html_of(&out));
    assert_eq!(cids.len(), 2);
    assert_eq!(cids[0], cids[1]);

    let related: Vec<_> = out.related_parts().collect();
    assert_eq!(related.len(), 1);
    assert_eq!(related[0].content_id.as_deref(), Some(cids[0].as_str()));
    assert_eq!(related[0].content_type, "image/png");
    assert_eq!(related[0].contents, png_bytes(24));
    assert!(related[0]
        .headers
        .iter()
        .any(|(k, v)| k.eq_ignore_ascii_case("content-location") && v == &url));

    assert_eq!(out.header("subject").as_deref(), Some("Newsletter"));
    assert_eq!(out.header("message-id").as_deref(), Some("<n1@example.com>"));
    mock.assert_async().await;
}

// ─── Rewritten references keep document order ──────────────────────

#[tokio::test]
async fn test_rewrite_preserves_document_order() {
    let mut server = mockito::Server::new_async().await;
    let mut mocks = Vec::new();
    for name in ["a", "b", "c"] {
        mocks.push(
            server
                .mock("GET", format!("/{name}.png").as_str())
                .with_body(png_bytes(20))
                .create_async()
                .await,
        );
    }
    let urls: Vec<String> = ["c", "a", "b"]
        .iter()
        .map(|n| format!("{}/{n}.png", server.url()))
        .collect();

    let tmp = tempfile::tempdir().unwrap();
    let html = format!(
        r#"<p><img src="{}"></p><video><source src="{}"></video><img src="{}">"#,
        urls[0], urls[1], urls[2]
    );
    let out = embed(options(tmp.path()), tmp.path(), &html_message(&html, &[])).await;

    let by_location: HashMap<String, String> = out
        .related_parts()
        .map(|p| {
            let location = p
                .headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case("content-location"))
                .map(|(_, v)| v.clone())
                .unwrap();
            (p.content_id.clone().unwrap(), location)
        })
        .collect();

    let order: Vec<String> = cids_in(html_of(&out))
        .iter()
        .map(|cid| by_location[cid].clone())
        .collect();
    assert_eq!(order, urls);
}

// ─── data: and cid: are never fetched or rewritten ─────────────────

#[tokio::test]
async fn test_inline_and_cid_references_untouched() {
    let tmp = tempfile::tempdir().unwrap();
    let html = r#"<img src="data:image/gif;base64,R0lGODlhAQABAAAAACw="><img src="cid:logo@x">"#;
    let input = tmp.path().join("a.eml");
    std::fs::write(&input, html_message(html, &[])).unwrap();

    let embedder = Embedder::new(options(tmp.path())).unwrap();
    let report = embedder.embed_file(&input).await.unwrap();
    assert_eq!(report.stats.urls, 0);
    assert_eq!(report.stats.rewritten, 0);

    let out = parse_eml(&report.output).unwrap();
    let body = html_of(&out);
    assert!(body.contains(r#"src="data:image/gif;base64,R0lGODlhAQABAAAAACw=""#));
    assert!(body.contains(r#"src="cid:logo@x""#));
    assert_eq!(out.parts.len(), 0);
    assert_eq!(
        std::fs::read_dir(tmp.path().join("media")).unwrap().count(),
        0,
        "nothing downloaded"
    );
}

// ─── Content that is not an image or video is not attached ─────────

#[tokio::test]
async fn test_html_behind_jpg_url_is_rejected() {
    let mut server = mockito::Server::new_async().await;
    let _page = server
        .mock("GET", "/photo.jpg")
        .with_header("content-type", "image/jpeg")
        .with_body("<!DOCTYPE html><html><body>Please log in</body></html>")
        .create_async()
        .await;
    let url = format!("{}/photo.jpg", server.url());

    let tmp = tempfile::tempdir().unwrap();
    let input = tmp.path().join("a.eml");
    std::fs::write(&input, html_message(&format!(r#"<img src="{url}">"#), &[])).unwrap();
    let report = Embedder::new(options(tmp.path()))
        .unwrap()
        .embed_file(&input)
        .await
        .unwrap();

    assert_eq!(report.stats.unsupported, 1);
    assert_eq!(report.stats.missing, 1);
    let out = parse_eml(&report.output).unwrap();
    assert!(html_of(&out).contains(&format!(r#"src="{url}""#)));
    assert!(out.parts.is_empty());
}

// ─── The content identifier follows the detected type ──────────────

#[tokio::test]
async fn test_cid_extension_comes_from_content() {
    let mut server = mockito::Server::new_async().await;
    let mut mocks = Vec::new();
    for path in ["/img", "/photo.jpg"] {
        mocks.push(
            server
                .mock("GET", path)
                .with_body(png_bytes(24))
                .create_async()
                .await,
        );
    }
    let bare = format!("{}/img", server.url());
    let mislabeled = format!("{}/photo.jpg", server.url());

    let tmp = tempfile::tempdir().unwrap();
    let eml = html_message(&format!(r#"<img src="{bare}"><img src="{mislabeled}">"#), &[]);
    let out = embed(options(tmp.path()), tmp.path(), &eml).await;

    let cids = cids_in(html_of(&out));
    assert_eq!(cids.len(), 2);
    for cid in &cids {
        assert!(cid.ends_with(".png"), "cid {cid} does not carry the PNG extension");
        assert!(!cid.contains(".jpg"));
    }
    assert!(out.related_parts().all(|p| p.content_type == "image/png"));
}

// ─── Extra body parts of a mixed message survive ───────────────────

#[tokio::test]
async fn test_mixed_message_keeps_extra_body_parts() {
    let raw = "From: a@b.com\r\n\
Subject: Digest\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"MM\"\r\n\
\r\n\
--MM\r\n\
Content-Type: text/html; charset=utf-8\r\n\
\r\n\
<p>FIRST <img src=\"cid:none\"></p>\r\n\
--MM\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
SECOND part\r\n\
--MM\r\n\
Content-Type: text/html; charset=utf-8\r\n\
\r\n\
<p>THIRD part</p>\r\n\
--MM--\r\n";

    let tmp = tempfile::tempdir().unwrap();
    let out = Embedder::new(options(tmp.path()))
        .unwrap()
        .embed_bytes(raw.as_bytes(), Path::new("mixed.eml"))
        .await
        .unwrap();
    let parsed = parse_message(&out.bytes).unwrap();

    assert!(html_of(&parsed).contains("FIRST"));
    for needle in ["SECOND part", "THIRD part"] {
        let kept = parsed.text.as_deref().is_some_and(|t| t.contains(needle))
            || parsed
                .parts
                .iter()
                .any(|p| String::from_utf8_lossy(&p.contents).contains(needle));
        assert!(kept, "{needle} was dropped");
    }
}

// ─── A short read leaves the reference in place ────────────────────

#[tokio::test]
async fn test_short_read_reference_not_rewritten() {
    let server = CannedServer::start(|_, _| {
        http_response(
            "200 OK",
            &[("Content-Length", "4096".to_string())],
            &png_bytes(64),
        )
    })
    .await;
    let url = server.url("/cut.png");

    let tmp = tempfile::tempdir().unwrap();
    let out = embed(
        options(tmp.path()),
        tmp.path(),
        &html_message(&format!(r#"<img src="{url}">"#), &[]),
    )
    .await;

    assert!(html_of(&out).contains(&format!(r#"src="{url}""#)));
    assert!(cids_in(html_of(&out)).is_empty());
    assert!(out.parts.is_empty());
}

// ─── Missing media can be marked ───────────────────────────────────

#[tokio::test]
async fn test_missing_reference_marked() {
    let mut server = mockito::Server::new_async().await;
    let _gone = server
        .mock("GET", "/gone.png")
        .with_status(404)
        .create_async()
        .await;
    let url = format!("{}/gone.png", server.url());

    let tmp = tempfile::tempdir().unwrap();
    let opts = EmbedOptions {
        on_missing: MissingPolicy::Mark,
        ..options(tmp.path())
    };
    let out = embed(
        opts,
        tmp.path(),
        &html_message(&format!(r#"<img src="{url}">"#), &[]),
    )
    .await;

    let body = html_of(&out);
    assert!(body.contains(r#"data-embed-missing="status""#), "got: {body}");
    assert!(body.contains(&url));
}

// ─── Relative references resolve against Content-Base ──────────────

#[tokio::test]
async fn test_relative_reference_resolved_with_content_base() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/news/img/a.png")
        .with_body(png_bytes(40))
        .expect(1)
        .create_async()
        .await;
    let base = format!("{}/news/", server.url());

    let tmp = tempfile::tempdir().unwrap();
    let eml = html_message(
        r#"<img src="img/a.png" loading="lazy" srcset="img/a@2x.png 2x">"#,
        &[("Content-Base", &base)],
    );
    let out = embed(options(tmp.path()), tmp.path(), &eml).await;

    let body = html_of(&out);
    assert_eq!(cids_in(body).len(), 1);
    assert!(!body.contains("loading="));
    assert!(!body.contains("srcset="));
    assert_eq!(out.related_parts().count(), 1);
    mock.assert_async().await;
}

// ─── Re-running skips finished files ───────────────────────────────

#[tokio::test]
async fn test_second_run_skips_existing_output() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/1.png")
        .with_body(png_bytes(24))
        .expect(1)
        .create_async()
        .await;
    let url = format!("{}/1.png", server.url());

    let dir = assert_fs::TempDir::new().unwrap();
    let input = dir.child("a.eml");
    input
        .write_str(&html_message(&format!(r#"<img src="{url}">"#), &[]))
        .unwrap();

    let embedder = Embedder::new(options(dir.path())).unwrap();
    let first = embedder.run(&[input.path().to_path_buf()]).await.unwrap();
    assert_eq!(first.processed.len(), 1);
    dir.child("a.embed.eml").assert(predicate::path::exists());
    let produced = std::fs::read(dir.child("a.embed.eml").path()).unwrap();

    let second = embedder
        .run(&[
            input.path().to_path_buf(),
            dir.child("a.embed.eml").path().to_path_buf(),
        ])
        .await
        .unwrap();
    assert!(second.processed.is_empty());
    let reasons: Vec<_> = second.skipped.iter().map(|s| s.reason).collect();
    assert_eq!(
        reasons,
        vec![SkipReason::OutputExists, SkipReason::AlreadyEmbedded]
    );
    assert_eq!(
        std::fs::read(dir.child("a.embed.eml").path()).unwrap(),
        produced
    );
    mock.assert_async().await;
}

#[tokio::test]
async fn test_keep_going_records_failures() {
    let tmp = tempfile::tempdir().unwrap();
    let good = tmp.path().join("good.eml");
    std::fs::write(&good, html_message("<p>no media</p>", &[])).unwrap();
    let missing = tmp.path().join("missing.eml");

    let opts = EmbedOptions {
        keep_going: true,
        ..options(tmp.path())
    };
    let summary = Embedder::new(opts)
        .unwrap()
        .run(&[missing.clone(), good.clone()])
        .await
        .unwrap();
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].input, missing);
    assert_eq!(summary.processed.len(), 1);
    assert!(summary.has_failures());

    let strict = Embedder::new(options(tmp.path())).unwrap();
    assert!(strict.run(&[missing]).await.is_err());
}

#[tokio::test]
async fn test_fixture_without_network_keeps_structure() {
    let raw = std::fs::read(common::fixture("newsletter.eml")).unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let opts = EmbedOptions {
        // Every host in the fixture is unreachable; fail fast.
        fetch_timeout: std::time::Duration::from_secs(2),
        ..options(tmp.path())
    };
    let embedder = Embedder::new(opts).unwrap();
    let out = embedder
        .embed_bytes(&raw, Path::new("newsletter.eml"))
        .await
        .unwrap();

    assert_eq!(out.stats.resolved, 1);
    assert_eq!(out.stats.urls, 5);
    assert_eq!(out.stats.rewritten, 0);

    let parsed = parse_message(&out.bytes).unwrap();
    assert!(parsed.text.as_deref().unwrap().contains("This week's picks"));
    let body = html_of(&parsed);
    assert!(body.contains("http://news.example.invalid/issues/42/banner.jpg"));
    assert!(!body.contains("width=\"0\""));
    assert!(body.contains(r#"width="1""#));
}

// ─── GIF conversion ────────────────────────────────────────────────

#[cfg(unix)]
mod gif {
    use super::*;
    use common::{fake_ffmpeg, gif_bytes, hanging_ffmpeg};
    use embedmail::config::TranscodeOptions;
    use std::path::PathBuf;
    use std::time::Duration;

    async fn gif_server() -> (mockito::ServerGuard, Vec<mockito::Mock>, String, String) {
        let mut server = mockito::Server::new_async().await;
        let mocks = vec![
            server
                .mock("GET", "/small.gif")
                .with_body(gif_bytes(200 * 1024))
                .create_async()
                .await,
            server
                .mock("GET", "/big.gif")
                .with_body(gif_bytes(500 * 1024))
                .create_async()
                .await,
        ];
        let small = format!("{}/small.gif", server.url());
        let big = format!("{}/big.gif", server.url());
        (server, mocks, small, big)
    }

    fn transcode_options(dir: &Path, ffmpeg: PathBuf) -> EmbedOptions {
        EmbedOptions {
            transcode: TranscodeOptions {
                enabled: true,
                ffmpeg,
                gif_threshold: 300 * 1024,
                timeout: Duration::from_secs(10),
            },
            ..options(dir)
        }
    }

    #[tokio::test]
    async fn test_hung_converter_times_out_and_keeps_gif() {
        let (_server, _mocks, small, big) = gif_server().await;
        let tmp = tempfile::tempdir().unwrap();
        let mut opts = transcode_options(tmp.path(), hanging_ffmpeg(tmp.path()));
        opts.transcode.timeout = Duration::from_millis(500);

        let eml = html_message(&format!(r#"<img src="{small}"><img src="{big}">"#), &[]);
        let started = std::time::Instant::now();
        let out = embed(opts, tmp.path(), &eml).await;
        assert!(started.elapsed() < Duration::from_secs(20));

        let body = html_of(&out);
        assert_eq!(body.matches("<img").count(), 2);
        assert!(!body.contains("<video"));
        assert_eq!(cids_in(body).len(), 2);
        assert!(out.related_parts().all(|p| p.content_type == "image/gif"));

        let leftovers: Vec<_> = std::fs::read_dir(tmp.path().join("media"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".mp4") || name.ends_with(".part"))
            .collect();
        assert!(leftovers.is_empty(), "left behind: {leftovers:?}");
    }

    #[tokio::test]
    async fn test_large_gif_becomes_video() {
        let (_server, _mocks, small, big) = gif_server().await;
        let tmp = tempfile::tempdir().unwrap();
        let ffmpeg = fake_ffmpeg(tmp.path());

        let eml = html_message(&format!(r#"<img src="{small}"><img src="{big}">"#), &[]);
        let out = embed(transcode_options(tmp.path(), ffmpeg), tmp.path(), &eml).await;
        let body = html_of(&out);

        assert_eq!(body.matches("<img").count(), 1);
        assert!(body.contains("<video autoplay=\"\""), "got: {body}");
        assert!(body.contains(r#"type="video/mp4""#));

        let parts: HashMap<String, String> = out
            .related_parts()
            .map(|p| (p.content_type.clone(), p.content_id.clone().unwrap()))
            .collect();
        assert_eq!(parts.len(), 2);
        let cids = cids_in(body);
        assert_eq!(cids, vec![parts["image/gif"].clone(), parts["video/mp4"].clone()]);
        assert!(parts["image/gif"].ends_with(".gif"));
        assert!(parts["video/mp4"].ends_with(".mp4"));

        let video = out
            .related_parts()
            .find(|p| p.content_type == "video/mp4")
            .unwrap();
        assert_eq!(video.contents, b"fakevideo");
    }

    #[tokio::test]
    async fn test_gifs_kept_when_converter_missing() {
        let (_server, _mocks, small, big) = gif_server().await;
        let tmp = tempfile::tempdir().unwrap();

        let eml = html_message(&format!(r#"<img src="{small}"><img src="{big}">"#), &[]);
        let opts = transcode_options(tmp.path(), tmp.path().join("no-such-ffmpeg"));
        let out = embed(opts, tmp.path(), &eml).await;
        let body = html_of(&out);

        assert_eq!(body.matches("<img").count(), 2);
        assert!(!body.contains("<video"));
        assert_eq!(cids_in(body).len(), 2);
        assert!(out.related_parts().all(|p| p.content_type == "image/gif"));
    }
}
