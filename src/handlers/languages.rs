//! Language catalog endpoint.

use crate::languages::Language;
use actix_web::HttpResponse;
use serde_json::json;

/// GET /api/v1/languages
///
/// Lists the locales a client may pass as `speak` or `listen`.
pub async fn list_languages() -> HttpResponse {
    let languages: Vec<_> = Language::ALL
        .iter()
        .map(|lang| {
            json!({
                "locale": lang.locale(),
                "name": lang.display_name(),
                "voice": lang.voice()
            })
        })
        .collect();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "languages": languages
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::MessageBody;

    #[actix_web::test]
    async fn test_catalog_lists_all_languages() {
        let response = list_languages().await;
        let body = response.into_body().try_into_bytes().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let languages = value["languages"].as_array().unwrap();
        assert_eq!(languages.len(), Language::ALL.len());
        assert!(languages.iter().any(|l| l["locale"] == "hi-IN"));
    }
}
