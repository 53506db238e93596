use serde::Deserialize;

use crate::error::AppResult;

const YOUTUBE_API: &str = "https://www.googleapis.com/youtube/v3";
const TRAILER_WORDS: &[&str] = &["trailer", "teaser", "preview", "official"];

/// YouTube Data API search, used when TMDB has no video for a title.
pub struct YoutubeClient {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

impl YoutubeClient {
    pub fn new(client: reqwest::Client, api_key: Option<String>) -> Self {
        Self::with_base_url(client, api_key, YOUTUBE_API.to_string())
    }

    pub fn with_base_url(client: reqwest::Client, api_key: Option<String>, base_url: String) -> Self {
        Self { client, api_key, base_url }
    }

    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    /// Video id of the first result that looks like a trailer, else the first
    /// result.
    pub async fn search_trailer(&self, title: &str, year: Option<i32>) -> AppResult<Option<String>> {
        let Some(key) = &self.api_key else {
            return Ok(None);
        };

        let q = match year {
            Some(year) => format!("{title} {year} official trailer"),
            None => format!("{title} official trailer"),
        };
        let url = format!("{}/search", self.base_url.trim_end_matches('/'));
        let resp: SearchResponse = self
            .client
            .get(url)
            .query(&[
                ("part", "snippet"),
                ("type", "video"),
                ("maxResults", "5"),
                ("safeSearch", "moderate"),
                ("q", q.as_str()),
                ("key", key.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let items: Vec<SearchItem> = resp.items.into_iter().filter(|i| i.id.video_id.is_some()).collect();
        let best = items
            .iter()
            .find(|item| {
                let title = item.snippet.title.to_lowercase();
                TRAILER_WORDS.iter().any(|w| title.contains(w))
            })
            .or_else(|| items.first());
        Ok(best.and_then(|item| item.id.video_id.clone()))
    }
}

/// Video id from a bare id or a watch, embed or short link.
pub fn extract_video_id(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if is_video_id(raw) {
        return Some(raw.to_string());
    }

    let url = url::Url::parse(raw).ok()?;
    let host = url.host_str()?.trim_start_matches("www.").trim_start_matches("m.");
    let candidate = match host {
        "youtu.be" => url.path_segments()?.next().map(str::to_string),
        "youtube.com" | "youtube-nocookie.com" => {
            let mut segments = url.path_segments()?;
            match segments.next() {
                Some("watch") => url.query_pairs().find(|(k, _)| k == "v").map(|(_, v)| v.into_owned()),
                Some("embed" | "shorts" | "v") => segments.next().map(str::to_string),
                _ => None,
            }
        },
        _ => None,
    };
    candidate.filter(|id| is_video_id(id))
}

fn is_video_id(s: &str) -> bool {
    s.len() == 11 && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: ItemId,
    snippet: Snippet,
}

#[derive(Debug, Deserialize)]
struct ItemId {
    #[serde(rename = "videoId")]
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Snippet {
    #[serde(default)]
    title: String,
}
