//! Fetching volume and issue metadata from ComicVine, with a persistent
//! response cache.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use chrono::NaiveDate;
use futures::future::join_all;
use kapowarr_model::{
    ComicvineId, FilenameData, IssueMetadata, RootFolderId, SpecialVersion,
    VolumeData, VolumeId, VolumeMetadata, VolumeRange,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::{debug, warn};

use crate::db::Database;
use crate::error::{KapowarrError, Result};
use crate::filename::{
    extract_issue_number, normalize_string, normalize_year,
    volume_number_in_text,
};
use crate::naming::generate_volume_folder_name;
use crate::session::{HttpSession, RequestSpec};
use crate::settings::{Settings, SettingsValues};

pub const CV_SITE_URL: &str = "https://comicvine.gamespot.com";
pub const CV_API_URL: &str = "https://comicvine.gamespot.com/api";

/// Seconds to wait between request batches, to keep the rate limit happy.
const CV_BRAKE_TIME: Duration = Duration::from_secs(10);
const VOLUMES_PER_REQUEST: usize = 100;
const ISSUE_VOLUMES_PER_REQUEST: usize = 50;

static FIGURE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<figure[^>]*>.*?</figure>|<img[^>]*/?>").unwrap()
});
static EMPTY_PARAGRAPH_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<p>(?:\s|\.|&nbsp;|<br\s*/?>)*</p>").unwrap()
});
static TRAILING_SECTION_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<(?:h[2-6]|ul|ol)[\s>]").unwrap());
static LIST_HEADER_PARAGRAPH_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<p>[^<]*:\s*</p>\s*$").unwrap());
static HREF_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"href="([^"]*)""#).unwrap());

/// Sentences in a volume description that give away a non-English
/// publication. Each pattern captures the language word, which must not
/// be "English" for the volume to count as translated.
static TRANSLATION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)^<p>\s*(\w+) publication",
        r"(?i)^<p>\s*published by the (\w+) wing of",
        r"(?i)^<p>\s*(\w+) translations? of",
        r"(?i)from (\w+)\.?</p>$",
        r"(?i)^<p>\s*publishes in (\w+)",
        r"(?i)^<p>\s*(\w+) language",
        r"(?i)^<p>\s*(\w+) edition of",
        r"(?i)^<p>\s*(\w+) reprint of",
        r"(?i)^<p>\s*(\w+) trade collection of",
        r"(?i)^<p>\s*Series of (\w+) collections\.?</p>$",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).unwrap())
    .collect()
});
static REPRINTS_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)reprints\.?</p>$").unwrap());

/// Turn a CV ID in any common form (`123`, `"cv:123"`, `"4050-123"`)
/// into its number.
pub fn to_number_cv_id(id: &str) -> Result<ComicvineId> {
    let mut id = id.trim();
    if let Some(stripped) = id.strip_prefix("cv:") {
        id = stripped;
    }
    if let Some(stripped) = id.strip_prefix("4050-") {
        id = stripped;
    }
    id.parse::<i64>()
        .map(ComicvineId)
        .map_err(|_| KapowarrError::VolumeNotMatched)
}

/// Reduce a volume/issue description (html) to the essential information:
/// images and empty paragraphs go; unless `short`, everything from the
/// first header or list onward (the credits sections) goes too; relative
/// links become absolute.
pub fn clean_description(description: &str, short: bool) -> String {
    if description.is_empty() {
        return String::new();
    }

    let mut result = FIGURE_REGEX.replace_all(description, "").to_string();
    result = EMPTY_PARAGRAPH_REGEX.replace_all(&result, "").to_string();

    if !short {
        if let Some(section) = TRAILING_SECTION_REGEX.find(&result) {
            let mut cut = section.start();
            // A paragraph ending in a colon right before a list is its
            // header and goes with it.
            if let Some(header) =
                LIST_HEADER_PARAGRAPH_REGEX.find(&result[..cut])
            {
                cut = header.start();
            }
            result.truncate(cut);
        }
    }

    result = HREF_REGEX
        .replace_all(&result, |captures: &regex::Captures<'_>| {
            let href = &captures[1];
            if href.starts_with("http") {
                format!(r#"href="{href}""#)
            } else {
                let trimmed =
                    href.trim_start_matches('.').trim_start_matches('/');
                format!(r#"href="{CV_SITE_URL}/{trimmed}""#)
            }
        })
        .to_string();

    result.trim().to_string()
}

/// Whether a (cleaned) description marks the volume as a non-English
/// publication.
pub fn is_translated(description: &str) -> bool {
    for pattern in TRANSLATION_PATTERNS.iter() {
        if let Some(captures) = pattern.captures(description) {
            if !captures[1].eq_ignore_ascii_case("english") {
                return true;
            }
        }
    }
    REPRINTS_REGEX.is_match(description)
}

// region API response shapes

#[derive(Debug, Deserialize)]
struct CvResponse<T> {
    status_code: i32,
    #[serde(default)]
    results: Option<T>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct CvVolume {
    id: i64,
    name: Option<String>,
    start_year: Option<String>,
    description: Option<String>,
    aliases: Option<String>,
    site_detail_url: Option<String>,
    count_of_issues: Option<i32>,
    publisher: Option<CvPublisher>,
    image: Option<CvImage>,
}

#[derive(Debug, Clone, Deserialize)]
struct CvPublisher {
    name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct CvImage {
    small_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct CvIssue {
    id: i64,
    volume: Option<CvIssueVolume>,
    issue_number: Option<String>,
    name: Option<String>,
    cover_date: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct CvIssueVolume {
    id: i64,
}

// endregion

/// The persistent response cache: the same catalog artefact is served
/// from disk instead of hitting the API again.
#[derive(Debug, Clone)]
pub struct CvCache {
    pool: SqlitePool,
}

impl CvCache {
    pub async fn open(cache_file: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(cache_file)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS queries (
                query TEXT PRIMARY KEY,
                response TEXT NOT NULL,
                stored_at INTEGER NOT NULL
            );
            ",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let response = sqlx::query_scalar::<_, String>(
            "SELECT response FROM queries WHERE query = ?;",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(response)
    }

    async fn put(&self, key: &str, response: &str) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO queries(query, response, stored_at)
            VALUES (?, ?, ?)
            ON CONFLICT(query) DO UPDATE SET
                response = excluded.response,
                stored_at = excluded.stored_at;
            ",
        )
        .bind(key)
        .bind(response)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Invalidate all cached queries of an endpoint that mention an id.
    pub async fn remove_from_cache(
        &self,
        endpoint: &str,
        cv_id: ComicvineId,
    ) -> Result<()> {
        let keys = sqlx::query("SELECT query FROM queries;")
            .fetch_all(&self.pool)
            .await?;
        let prefix = format!("{CV_API_URL}/{endpoint}");
        let id = cv_id.to_string();
        for row in keys {
            let key: String = row.get("query");
            if key.starts_with(&prefix) && key.contains(&id) {
                sqlx::query("DELETE FROM queries WHERE query = ?;")
                    .bind(&key)
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }
}

/// A proposed catalog match for one file group during library import.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct CvMatchProposal {
    pub id: Option<ComicvineId>,
    pub title: Option<String>,
    pub issue_count: Option<i32>,
    pub link: Option<String>,
}

/// The fields of [`FilenameData`] that group files into one volume:
/// everything except the issue number.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileGroupKey {
    pub series: String,
    pub year: Option<i32>,
    pub volume_number: Option<VolumeRange>,
    pub annual: bool,
    pub special_version: Option<SpecialVersion>,
}

impl From<&FilenameData> for FileGroupKey {
    fn from(data: &FilenameData) -> Self {
        Self {
            series: data.series.to_lowercase(),
            year: data.year,
            volume_number: data.volume_number,
            annual: data.annual,
            special_version: data.special_version,
        }
    }
}

/// Client for the ComicVine API.
#[derive(Debug, Clone)]
pub struct ComicVine {
    session: HttpSession,
    cache: CvCache,
    database: Database,
    settings: Settings,
    api_key: String,
}

impl ComicVine {
    /// Start interacting with ComicVine, using the configured API key or
    /// a supplied override.
    pub fn new(
        session: HttpSession,
        cache: CvCache,
        database: Database,
        settings: Settings,
        api_key_override: Option<String>,
    ) -> Result<Self> {
        let api_key = api_key_override
            .or_else(|| settings.get().comicvine_api_key)
            .ok_or(KapowarrError::InvalidComicVineApiKey)?;
        Ok(Self {
            session,
            cache,
            database,
            settings,
            api_key,
        })
    }

    pub fn cache(&self) -> &CvCache {
        &self.cache
    }

    /// One GET against the API, going through the response cache unless
    /// `skip_cache`.
    async fn api_call<T: serde::de::DeserializeOwned + Default>(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
        skip_cache: bool,
    ) -> Result<T> {
        let url = format!("{CV_API_URL}/{endpoint}");
        let mut cache_key = url.clone();
        for (key, value) in params {
            cache_key.push_str(&format!("&{key}={value}"));
        }

        if !skip_cache {
            if let Some(cached) = self.cache.get(&cache_key).await? {
                debug!("Serving {endpoint} from cache");
                let response: CvResponse<T> =
                    serde_json::from_str(&cached)?;
                if let Some(results) = response.results {
                    return Ok(results);
                }
            }
        }

        let mut query: Vec<(&str, &str)> =
            vec![("api_key", self.api_key.as_str()), ("format", "json")];
        query.extend_from_slice(params);

        let response = self
            .session
            .request(RequestSpec::get(&url).with_query(&query))
            .await?;

        if [420u16, 429].contains(&response.status().as_u16()) {
            return Err(KapowarrError::CVRateLimitReached);
        }
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(KapowarrError::InvalidComicVineApiKey);
        }

        let body = response.text().await?;
        let parsed: CvResponse<T> = serde_json::from_str(&body)?;
        match parsed.status_code {
            1 => {}
            100 => return Err(KapowarrError::InvalidComicVineApiKey),
            101 => return Err(KapowarrError::VolumeNotMatched),
            code => {
                warn!("ComicVine returned status code {code}");
                return Err(KapowarrError::CVRateLimitReached);
            }
        }

        self.cache.put(&cache_key, &body).await?;
        parsed
            .results
            .ok_or(KapowarrError::VolumeNotMatched)
    }

    fn format_volume_output(
        &self,
        volume: &CvVolume,
        settings: &SettingsValues,
    ) -> VolumeMetadata {
        let title = normalize_string(volume.name.as_deref().unwrap_or(""));
        let publisher = volume
            .publisher
            .as_ref()
            .and_then(|p| p.name.clone());
        let site_url =
            volume.site_detail_url.clone().unwrap_or_default();
        let year = volume
            .start_year
            .as_deref()
            .and_then(normalize_year);

        let description = clean_description(
            volume.description.as_deref().unwrap_or(""),
            false,
        );
        let translated = is_translated(&description);

        // The volume number only ever appears in the description text.
        let volume_number = volume
            .description
            .as_deref()
            .and_then(volume_number_in_text)
            .map(|range| range.first())
            .unwrap_or(1);

        let mut result = VolumeMetadata {
            comicvine_id: ComicvineId(volume.id),
            title: title.clone(),
            year,
            volume_number,
            cover_link: volume
                .image
                .as_ref()
                .and_then(|i| i.small_url.clone())
                .unwrap_or_default(),
            description: (!description.is_empty()).then_some(description),
            site_url,
            aliases: volume
                .aliases
                .as_deref()
                .unwrap_or("")
                .split("\r\n")
                .filter(|alias| !alias.trim().is_empty())
                .map(|alias| alias.trim().to_string())
                .collect(),
            publisher,
            issue_count: volume.count_of_issues.unwrap_or(0),
            translated,
            already_added: None,
            issues: None,
            folder_name: String::new(),
        };

        // Borrow the naming code by building a transient volume row.
        let volume_data = VolumeData {
            id: VolumeId(-1),
            comicvine_id: result.comicvine_id,
            title: result.title.clone(),
            alt_title: None,
            year: result.year,
            publisher: result.publisher.clone(),
            volume_number: result.volume_number,
            description: result.description.clone(),
            site_url: result.site_url.clone(),
            monitored: false,
            monitor_new_issues: false,
            root_folder: RootFolderId(1),
            folder: String::new(),
            custom_folder: false,
            special_version: SpecialVersion::Normal,
            special_version_locked: false,
            last_cv_fetch: 0,
        };
        result.folder_name =
            generate_volume_folder_name(&volume_data, settings);
        result
    }

    fn format_issue_output(&self, issue: &CvIssue) -> IssueMetadata {
        let issue_number = issue
            .issue_number
            .clone()
            .unwrap_or_else(|| "0".to_string())
            .replace('/', "-")
            .trim()
            .to_string();
        let calculated_issue_number = extract_issue_number(&issue_number)
            .map(|range| range.first())
            .unwrap_or(0.0);

        IssueMetadata {
            comicvine_id: ComicvineId(issue.id),
            volume_comicvine_id: ComicvineId(
                issue.volume.as_ref().map(|v| v.id).unwrap_or(0),
            ),
            issue_number,
            calculated_issue_number,
            title: issue
                .name
                .as_deref()
                .map(normalize_string)
                .filter(|title| !title.is_empty()),
            date: issue.cover_date.as_deref().and_then(|date| {
                NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
            }),
            description: issue
                .description
                .as_deref()
                .map(|d| clean_description(d, true))
                .filter(|d| !d.is_empty()),
        }
    }

    /// Test if the API key works, against an endpoint Kapowarr doesn't
    /// otherwise use so the important rate limits stay untouched.
    pub async fn test_key(&self) -> bool {
        self.api_call::<serde_json::Value>("publisher/4010-31", &[], true)
            .await
            .is_ok()
    }

    /// Get the metadata of one volume, including its issues.
    pub async fn fetch_volume(
        &self,
        cv_id: ComicvineId,
    ) -> Result<VolumeMetadata> {
        debug!("Fetching volume data for {cv_id}");
        let settings = self.settings.get();

        let volume: CvVolume = self
            .api_call(&format!("volume/4050-{cv_id}"), &[], false)
            .await?;
        let mut volume_info = self.format_volume_output(&volume, &settings);
        volume_info.issues = Some(self.fetch_issues(&[cv_id]).await?);

        debug!("Fetching volume data result: {volume_info:?}");
        Ok(volume_info)
    }

    /// Get the metadata of many volumes, without their issues. The list
    /// is truncated if the rate limit gets in the way.
    pub async fn fetch_volumes(
        &self,
        cv_ids: &[ComicvineId],
    ) -> Result<Vec<VolumeMetadata>> {
        debug!("Fetching volume data for {cv_ids:?}");
        let settings = self.settings.get();

        let mut volume_infos = Vec::with_capacity(cv_ids.len());
        for (batch_index, batch) in
            cv_ids.chunks(VOLUMES_PER_REQUEST).enumerate()
        {
            if batch_index > 0 {
                debug!("Waiting to keep the CV rate limit happy");
                tokio::time::sleep(CV_BRAKE_TIME).await;
            }

            let filter = format!(
                "id:{}",
                batch
                    .iter()
                    .map(|id| id.to_string())
                    .collect::<Vec<_>>()
                    .join("|")
            );
            let volumes: Vec<CvVolume> = match self
                .api_call("volumes", &[("filter", &filter)], false)
                .await
            {
                Ok(volumes) => volumes,
                Err(
                    KapowarrError::CVRateLimitReached
                    | KapowarrError::InvalidComicVineApiKey,
                ) => break,
                Err(error) => return Err(error),
            };

            volume_infos.extend(
                volumes
                    .iter()
                    .map(|v| self.format_volume_output(v, &settings)),
            );
        }

        Ok(volume_infos)
    }

    /// Get the issue metadata of the given volumes. The list is truncated
    /// if the rate limit gets in the way.
    pub async fn fetch_issues(
        &self,
        volume_cv_ids: &[ComicvineId],
    ) -> Result<Vec<IssueMetadata>> {
        debug!("Fetching issue data for volumes {volume_cv_ids:?}");

        let mut issue_infos: Vec<IssueMetadata> = Vec::new();
        for batch in volume_cv_ids.chunks(ISSUE_VOLUMES_PER_REQUEST) {
            let filter = format!(
                "volume:{}",
                batch
                    .iter()
                    .map(|id| id.to_string())
                    .collect::<Vec<_>>()
                    .join("|")
            );

            let mut offset = 0usize;
            loop {
                let offset_string = offset.to_string();
                let mut params: Vec<(&str, &str)> =
                    vec![("filter", &filter)];
                if offset > 0 {
                    params.push(("offset", &offset_string));
                }

                let issues: Vec<CvIssue> = match self
                    .api_call("issues", &params, false)
                    .await
                {
                    Ok(issues) => issues,
                    Err(
                        KapowarrError::CVRateLimitReached
                        | KapowarrError::InvalidComicVineApiKey,
                    ) => return Ok(dedupe_issues(issue_infos)),
                    Err(error) => return Err(error),
                };

                let page_size = issues.len();
                issue_infos.extend(
                    issues.iter().map(|issue| self.format_issue_output(issue)),
                );
                if page_size < 100 {
                    break;
                }
                offset += 100;
                debug!("Waiting to keep the CV rate limit happy");
                tokio::time::sleep(CV_BRAKE_TIME).await;
            }
        }

        Ok(dedupe_issues(issue_infos))
    }

    /// Search for volumes. ID-form queries resolve directly.
    pub async fn search_volumes(
        &self,
        query: &str,
    ) -> Result<Vec<VolumeMetadata>> {
        debug!("Searching for volumes with the query {query}");
        let settings = self.settings.get();

        if query.starts_with("4050-") || query.starts_with("cv:") {
            let Ok(cv_id) = to_number_cv_id(query) else {
                return Ok(vec![]);
            };
            return match self.fetch_volume(cv_id).await {
                Ok(volume) => Ok(vec![volume]),
                Err(_) => Ok(vec![]),
            };
        }

        let results: Vec<CvVolume> = match self
            .api_call(
                "search",
                &[
                    ("query", query),
                    ("resources", "volume"),
                    ("limit", "50"),
                ],
                false,
            )
            .await
        {
            Ok(results) => results,
            Err(_) => return Ok(vec![]),
        };

        let mut formatted: Vec<VolumeMetadata> = results
            .iter()
            .map(|volume| self.format_volume_output(volume, &settings))
            .collect();

        // Mark entries that are already in the library.
        let volumes = self.database.volumes();
        for result in &mut formatted {
            result.already_added = volumes
                .volume_id_of_comicvine(result.comicvine_id)
                .await?;
        }

        debug!("Searching for volumes with query result: {formatted:?}");
        Ok(formatted)
    }

    /// Match filename groups to CV volumes, searching once per unique
    /// series title instead of once per file.
    pub async fn filenames_to_cvs(
        &self,
        file_datas: &[FilenameData],
        only_english: bool,
    ) -> Result<HashMap<FileGroupKey, CvMatchProposal>> {
        let mut titles_to_files: HashMap<String, Vec<&FilenameData>> =
            HashMap::new();
        for file_data in file_datas {
            titles_to_files
                .entry(file_data.series.to_lowercase())
                .or_default()
                .push(file_data);
        }

        let titles: Vec<String> = titles_to_files.keys().cloned().collect();
        let searches = titles
            .iter()
            .map(|title| self.search_volumes(title));
        let responses = join_all(searches).await;

        let mut matches = HashMap::new();
        for (title, response) in titles.iter().zip(responses) {
            let results: Vec<VolumeMetadata> = match response {
                Ok(results) => results
                    .into_iter()
                    .filter(|result| {
                        crate::matching::match_title(title, &result.title)
                            && (!only_english || !result.translated)
                    })
                    .collect(),
                Err(KapowarrError::CVRateLimitReached) => continue,
                Err(error) => return Err(error),
            };

            for file in &titles_to_files[title] {
                let best =
                    crate::matching::select_best_volume_result_for_file(
                        file, &results,
                    );
                let proposal = match best {
                    Some(volume) => CvMatchProposal {
                        id: Some(volume.comicvine_id),
                        title: Some(format!(
                            "{} ({})",
                            volume.title,
                            volume
                                .year
                                .map(|y| y.to_string())
                                .unwrap_or_else(|| "Unknown".to_string())
                        )),
                        issue_count: Some(volume.issue_count),
                        link: Some(volume.site_url.clone()),
                    },
                    None => CvMatchProposal {
                        id: None,
                        title: None,
                        issue_count: None,
                        link: None,
                    },
                };
                matches.insert(FileGroupKey::from(*file), proposal);
            }
        }

        Ok(matches)
    }
}

fn dedupe_issues(issues: Vec<IssueMetadata>) -> Vec<IssueMetadata> {
    let mut seen = std::collections::HashSet::new();
    issues
        .into_iter()
        .filter(|issue| seen.insert(issue.comicvine_id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_number_cv_id() {
        assert_eq!(to_number_cv_id("123").unwrap(), ComicvineId(123));
        assert_eq!(to_number_cv_id("cv:123").unwrap(), ComicvineId(123));
        assert_eq!(to_number_cv_id("4050-123").unwrap(), ComicvineId(123));
        assert_eq!(
            to_number_cv_id("cv:4050-123").unwrap(),
            ComicvineId(123)
        );
        assert!(to_number_cv_id("batman").is_err());
    }

    #[test]
    fn test_clean_description_strips_images_and_credits() {
        let description = concat!(
            "<p>A fine comic.</p>",
            "<figure><img src=\"x.jpg\"></figure>",
            "<p>   </p>",
            "<h4>Creators</h4><ul><li>Someone</li></ul>",
        );
        let cleaned = clean_description(description, false);
        assert_eq!(cleaned, "<p>A fine comic.</p>");
    }

    #[test]
    fn test_clean_description_short_keeps_lists() {
        let description =
            "<p>Intro.</p><ul><li>kept in short mode</li></ul>";
        let cleaned = clean_description(description, true);
        assert!(cleaned.contains("<ul>"));
    }

    #[test]
    fn test_clean_description_removes_list_header() {
        let description =
            "<p>Story.</p><p>Collects:</p><ul><li>1-5</li></ul>";
        let cleaned = clean_description(description, false);
        assert_eq!(cleaned, "<p>Story.</p>");
    }

    #[test]
    fn test_clean_description_fixes_links() {
        let description = r#"<p>See <a href="/batman">here</a>.</p>"#;
        let cleaned = clean_description(description, false);
        assert!(cleaned
            .contains(r#"href="https://comicvine.gamespot.com/batman""#));
    }

    #[test]
    fn test_is_translated() {
        assert!(is_translated("<p>German publication of Batman.</p>"));
        assert!(is_translated("<p>Spanish language edition</p>"));
        assert!(!is_translated("<p>English publication of Batman.</p>"));
        assert!(!is_translated("<p>The caped crusader returns.</p>"));
    }
}
