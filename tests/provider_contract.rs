//! Contract tests for the HTTP-backed providers against a local mock of
//! their APIs. No external network involved.

use saveninja::providers::{DownloadOpts, Payload, Provider};
use saveninja::providers::rapidapi::RapidApiProvider;
use saveninja::providers::savenow::SaveNowProvider;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn ensure_env() {
    std::env::set_var("RAPIDAPI_KEY", "test-key");
    std::env::set_var("DOWNLOAD_DIR", std::env::temp_dir().join("saveninja-tests").display().to_string());
    let _ = std::fs::create_dir_all(std::env::temp_dir().join("saveninja-tests"));
}

#[tokio::test]
async fn rapidapi_single_video() {
    ensure_env();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/social/autolink"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-ratelimit-requests-remaining", "841")
                .set_body_json(serde_json::json!({
                    "title": "Dance clip",
                    "author": "someone",
                    "medias": [
                        {"url": format!("{}/cdn/clip-hd.mp4", server.uri()), "type": "video", "quality": "hd"},
                        {"url": format!("{}/cdn/clip-sd.mp4", server.uri()), "type": "video", "quality": "sd"}
                    ]
                })),
        )
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/cdn/clip-hd.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 2048]))
        .mount(&server)
        .await;

    let provider = RapidApiProvider::with_base_url(&server.uri(), "mock.host");
    let payload = provider
        .download("https://www.tiktok.com/@user/video/123", &DownloadOpts::default())
        .await
        .unwrap();

    match payload {
        Payload::Single(item) => {
            assert_eq!(item.file_size, 2048);
            assert!(!item.is_photo);
            assert_eq!(item.info.title, "Dance clip");
            assert_eq!(item.quota.as_deref(), Some("841"));
            assert!(item.file_path.exists());
            let _ = std::fs::remove_file(&item.file_path);
        }
        Payload::Carousel(_) => panic!("quality variants must not become a carousel"),
    }
}

#[tokio::test]
async fn rapidapi_instagram_carousel() {
    ensure_env();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/social/autolink"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "title": "Trip",
            "username": "traveler",
            "medias": [
                {"url": format!("{}/cdn/1.jpg", server.uri()), "type": "image"},
                {"url": format!("{}/cdn/2.jpg", server.uri()), "type": "image"},
                {"url": format!("{}/cdn/3.mp4", server.uri()), "type": "video"}
            ]
        })))
        .mount(&server)
        .await;

    for name in ["1.jpg", "2.jpg", "3.mp4"] {
        Mock::given(method("GET"))
            .and(path(format!("/cdn/{}", name)))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 512]))
            .mount(&server)
            .await;
    }

    let provider = RapidApiProvider::with_base_url(&server.uri(), "mock.host");
    let payload = provider
        .download("https://www.instagram.com/p/CXYZ/", &DownloadOpts::default())
        .await
        .unwrap();

    match payload {
        Payload::Carousel(items) => {
            assert_eq!(items.len(), 3);
            assert_eq!(items.iter().filter(|i| i.is_photo).count(), 2);
            assert_eq!(items[0].info.author, "traveler");
            for item in &items {
                assert!(item.file_path.exists());
                let _ = std::fs::remove_file(&item.file_path);
            }
        }
        Payload::Single(_) => panic!("three distinct medias must become a carousel"),
    }
}

#[tokio::test]
async fn rapidapi_error_body_surfaces_message() {
    ensure_env();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/social/autolink"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "error": true,
            "message": "This post is private"
        })))
        .mount(&server)
        .await;

    let provider = RapidApiProvider::with_base_url(&server.uri(), "mock.host");
    let error = provider
        .download("https://www.instagram.com/p/PRIV/", &DownloadOpts::default())
        .await
        .err()
        .unwrap();
    assert!(error.contains("private"));
}

#[tokio::test]
async fn savenow_job_flow() {
    ensure_env();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/ajax/download.php"))
        .and(query_param("format", "720"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-ratelimit-requests-remaining", "512")
                .set_body_json(serde_json::json!({
                    "success": true,
                    "id": "job-1",
                    "title": "Long video",
                    "progress_url": format!("{}/ajax/progress.php?id=job-1", server.uri())
                })),
        )
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/ajax/progress.php"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "progress": 1000,
            "success": 1,
            "download_url": format!("{}/cdn/file.mp4", server.uri())
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/cdn/file.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 4096]))
        .mount(&server)
        .await;

    let provider = SaveNowProvider::with_base_url(&server.uri(), "mock.host");
    let opts = DownloadOpts { duration_hint_secs: Some(900), ..Default::default() };
    let payload = provider.download("https://youtube.com/watch?v=LONG", &opts).await.unwrap();

    match payload {
        Payload::Single(item) => {
            assert_eq!(item.file_size, 4096);
            assert_eq!(item.info.title, "Long video");
            assert_eq!(item.quota.as_deref(), Some("512"));
            assert!(item.prep_ms.is_some());
            assert!(item.download_ms.is_some());
            assert!(item.download_host.is_some());
            let _ = std::fs::remove_file(&item.file_path);
        }
        Payload::Carousel(_) => panic!("savenow never returns carousels"),
    }
}

#[tokio::test]
async fn savenow_failed_job_is_an_error() {
    ensure_env();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/ajax/download.php"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "success": false,
            "error": "Video unavailable"
        })))
        .mount(&server)
        .await;

    let provider = SaveNowProvider::with_base_url(&server.uri(), "mock.host");
    let error = provider
        .download("https://youtube.com/watch?v=GONE", &DownloadOpts::default())
        .await
        .err()
        .unwrap();
    assert!(error.contains("unavailable"));
}
