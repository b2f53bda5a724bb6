//! Querying the registered search sources and aggregating, filtering and
//! ranking their results.

use async_trait::async_trait;
use futures::future::join_all;
use kapowarr_model::{
    IssueId, IssueRange, MatchedSearchResult, SearchResultData,
    SpecialVersion, VolumeId,
};
use once_cell::sync::Lazy;
use ordered_float::OrderedFloat;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::db::Database;
use crate::error::Result;
use crate::filename::{extract_filename_data, extract_year_from_date, ExtractOptions};
use crate::matching::{
    annotate_search_result, cmp_rank, rank_search_result, NumberToYear,
};
use crate::session::HttpSession;
use crate::settings::SettingsValues;

/// A search source that can be interrogated with a query string.
///
/// Sources are registered by hand in [`registered_sources`].
#[async_trait]
pub trait SearchSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn search(
        &self,
        session: &HttpSession,
        query: &str,
    ) -> Result<Vec<SearchResultData>>;
}

/// The active search sources for the given settings.
pub fn registered_sources(
    settings: &SettingsValues,
) -> Vec<Box<dyn SearchSource>> {
    let mut sources: Vec<Box<dyn SearchSource>> = Vec::new();
    if settings.enable_getcomics {
        sources.push(Box::new(GetComicsSource));
    }
    sources
}

// region GetComics

const GC_SITE_URL: &str = "https://getcomics.org";

static GC_RESULT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?is)<h1\s+class="post-title"><a\s+href="([^"]+)"[^>]*>(.*?)</a></h1>"#,
    )
    .unwrap()
});
static TAG_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());
static SIZE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)([\d.]+)\s*(kb|mb|gb)").unwrap()
});

/// Search source scraping the GetComics site.
#[derive(Debug)]
pub struct GetComicsSource;

#[async_trait]
impl SearchSource for GetComicsSource {
    fn name(&self) -> &'static str {
        "GetComics"
    }

    async fn search(
        &self,
        session: &HttpSession,
        query: &str,
    ) -> Result<Vec<SearchResultData>> {
        let body = session
            .request(
                crate::session::RequestSpec::get(GC_SITE_URL)
                    .with_query(&[("s", query)]),
            )
            .await?
            .text()
            .await?;

        let mut results = Vec::new();
        for captures in GC_RESULT_REGEX.captures_iter(&body) {
            let link = captures[1].to_string();
            let raw_title = TAG_REGEX.replace_all(&captures[2], "");
            let display_title =
                crate::filename::normalize_string(&raw_title);

            let data = extract_filename_data(
                &display_title,
                ExtractOptions {
                    assume_volume_number: false,
                    ..Default::default()
                },
            );
            let filesize = SIZE_REGEX
                .captures(&display_title)
                .and_then(|size| {
                    let number: f64 = size[1].parse().ok()?;
                    let multiplier: f64 = match size[2].to_lowercase().as_str()
                    {
                        "kb" => 1024.0,
                        "mb" => 1024.0 * 1024.0,
                        _ => 1024.0 * 1024.0 * 1024.0,
                    };
                    Some((number * multiplier) as i64)
                })
                .unwrap_or(0);

            results.push(SearchResultData {
                series: data.series,
                year: data.year,
                volume_number: data.volume_number,
                special_version: data.special_version,
                issue_number: data.issue_number,
                annual: data.annual,
                link,
                display_title: display_title.to_string(),
                source: self.name().to_string(),
                filesize,
                pages: 0,
                releaser: None,
                scan_type: None,
                resolution: None,
                dpi: None,
            });
        }

        debug!(
            "GetComics search for {query} returned {} results",
            results.len()
        );
        Ok(results)
    }
}

// endregion

/// The query templates per kind of search. `{title}` etc. get substituted
/// with the volume's metadata.
fn query_formats(
    special_version: SpecialVersion,
    issue_search: bool,
) -> &'static [&'static str] {
    match special_version {
        SpecialVersion::TradePaperBack => &[
            "{title} Vol. {volume_number} ({year}) TPB",
            "{title} ({year}) TPB",
            "{title} Vol. {volume_number} TPB",
            "{title} Vol. {volume_number}",
            "{title}",
        ],
        SpecialVersion::VolumeAsIssue => {
            &["{title} ({year})", "{title} Vol. {volume_number}", "{title}"]
        }
        _ if issue_search => &[
            "{title} #{issue_number} ({year})",
            "{title} ({year})",
            "{title}",
        ],
        _ => &[
            "{title} Vol. {volume_number} ({year})",
            "{title} ({year})",
            "{title} Vol. {volume_number}",
            "{title}",
        ],
    }
}

fn build_queries(
    formats: &[&str],
    title: &str,
    volume_number: i32,
    year: Option<i32>,
    issue_number: Option<&str>,
) -> Vec<String> {
    let mut queries = Vec::with_capacity(formats.len());
    for format in formats {
        let mut query = format
            .replace("{title}", title)
            .replace("{volume_number}", &volume_number.to_string())
            .replace(
                "{issue_number}",
                issue_number.unwrap_or_default(),
            );
        query = match year {
            Some(year) => query.replace("{year}", &year.to_string()),
            None => query.replace("({year})", "").trim().to_string(),
        };
        let query = query.split_whitespace().collect::<Vec<_>>().join(" ");
        if !queries.contains(&query) {
            queries.push(query);
        }
    }
    queries
}

/// Do a manual search for a volume or issue: all sources, all query
/// templates, deduplicated, annotated and ranked best-first.
pub async fn manual_search(
    database: &Database,
    settings: &SettingsValues,
    session: &HttpSession,
    volume_id: VolumeId,
    issue_id: Option<IssueId>,
) -> Result<Vec<MatchedSearchResult>> {
    let volumes = database.volumes();
    let blocklist = database.blocklist();

    let volume = volumes.fetch_volume(volume_id).await?;
    let volume_issues = volumes.fetch_issues(volume_id).await?;
    let number_to_year: NumberToYear = volume_issues
        .iter()
        .map(|issue| {
            (
                OrderedFloat(issue.calculated_issue_number),
                extract_year_from_date(
                    issue
                        .date
                        .map(|d| d.format("%Y-%m-%d").to_string())
                        .as_deref(),
                ),
            )
        })
        .collect();

    let mut issue_number: Option<String> = None;
    let mut calculated_issue_number: Option<f64> = None;
    if let Some(issue_id) = issue_id {
        if matches!(
            volume.special_version,
            SpecialVersion::Normal | SpecialVersion::VolumeAsIssue
        ) {
            let issue = volumes.fetch_issue(issue_id).await?;
            issue_number = Some(issue.issue_number.clone());
            calculated_issue_number = Some(issue.calculated_issue_number);
        }
    }

    info!(
        "Starting manual search: {} ({}) {}",
        volume.title,
        volume.year.map(|y| y.to_string()).unwrap_or_default(),
        calculated_issue_number
            .map(|n| format!("#{n}"))
            .unwrap_or_default()
    );

    let sources = registered_sources(settings);
    if sources.is_empty() {
        return Ok(vec![]);
    }

    let titles: Vec<String> = [Some(volume.title.clone()), volume.alt_title.clone()]
        .into_iter()
        .flatten()
        .collect();

    for title in titles {
        let search_title = title.replace(':', "");
        let formats = query_formats(
            volume.special_version,
            issue_number.is_some(),
        );
        let queries = build_queries(
            formats,
            &search_title,
            volume.volume_number,
            volume.year,
            issue_number.as_deref(),
        );

        // Bounded fan-out over all sources and queries; per-source
        // failures are captured, not propagated.
        let searches = sources.iter().flat_map(|source| {
            queries
                .iter()
                .map(move |query| async move {
                    (
                        source.name(),
                        source.search(session, query).await,
                    )
                })
        });
        let responses = join_all(searches).await;

        let mut search_results: Vec<SearchResultData> = Vec::new();
        let mut processed_links: std::collections::HashSet<String> =
            std::collections::HashSet::new();
        for (source_name, response) in responses {
            match response {
                Ok(results) => {
                    for result in results {
                        // Multiple queries often return the same release.
                        if processed_links.insert(result.link.clone()) {
                            search_results.push(result);
                        }
                    }
                }
                Err(error) => {
                    warn!("Search via {source_name} failed: {error}");
                }
            }
        }

        if search_results.is_empty() {
            continue;
        }

        let mut results: Vec<MatchedSearchResult> =
            Vec::with_capacity(search_results.len());
        for result in search_results {
            let blocklisted = blocklist.contains(&result.link);
            results.push(annotate_search_result(
                result,
                &volume,
                &volume_issues,
                &number_to_year,
                calculated_issue_number,
                blocklisted,
            ));
        }

        let issue_year = calculated_issue_number.and_then(|number| {
            number_to_year
                .get(&OrderedFloat(number))
                .copied()
                .flatten()
        });
        results.sort_by(|a, b| {
            cmp_rank(
                &rank_search_result(
                    a,
                    &search_title,
                    volume.volume_number,
                    (volume.year, issue_year),
                    calculated_issue_number,
                ),
                &rank_search_result(
                    b,
                    &search_title,
                    volume.volume_number,
                    (volume.year, issue_year),
                    calculated_issue_number,
                ),
            )
        });

        debug!("Manual search results: {results:?}");
        return Ok(results);
    }

    Ok(vec![])
}

/// Search for one issue and pick the first matching result.
async fn auto_search_issue(
    database: &Database,
    settings: &SettingsValues,
    session: &HttpSession,
    volume_id: VolumeId,
    issue_id: IssueId,
) -> Result<Vec<MatchedSearchResult>> {
    let volumes = database.volumes();
    let issue = volumes.fetch_issue(issue_id).await?;
    let has_files = !database
        .files()
        .fetch_for_issue(issue_id)
        .await?
        .is_empty();
    if !issue.monitored || has_files {
        return Ok(vec![]);
    }

    let results =
        manual_search(database, settings, session, volume_id, Some(issue_id))
            .await?;
    Ok(results.into_iter().filter(|r| r.is_match).take(1).collect())
}

/// Search for a volume or issue and automatically choose results. For
/// volume-wide searches a covering subset is selected: non-overlapping
/// results within the open issues, then a per-issue backfill for what is
/// still missing.
pub async fn auto_search(
    database: &Database,
    settings: &SettingsValues,
    session: &HttpSession,
    volume_id: VolumeId,
    issue_id: Option<IssueId>,
) -> Result<Vec<MatchedSearchResult>> {
    let volumes = database.volumes();
    let volume = volumes.fetch_volume(volume_id).await?;
    info!(
        "Starting auto search for volume {volume_id} {}",
        issue_id
            .map(|id| format!("issue {id}"))
            .unwrap_or_default()
    );

    if !volume.monitored {
        // Volume is unmonitored so don't auto search.
        debug!("Auto search results: []");
        return Ok(vec![]);
    }

    if let Some(issue_id) = issue_id {
        let result = auto_search_issue(
            database, settings, session, volume_id, issue_id,
        )
        .await?;
        debug!("Auto search results: {result:?}");
        return Ok(result);
    }

    let searchable_issues = volumes.open_issues(volume_id).await?;
    if searchable_issues.is_empty() {
        debug!("Auto search results: []");
        return Ok(vec![]);
    }

    let search_results: Vec<MatchedSearchResult> =
        manual_search(database, settings, session, volume_id, None)
            .await?
            .into_iter()
            .filter(|result| result.is_match)
            .collect();

    if !matches!(
        volume.special_version,
        SpecialVersion::Normal | SpecialVersion::VolumeAsIssue
    ) {
        // One "item" volumes need just the first result.
        let result: Vec<MatchedSearchResult> =
            search_results.into_iter().take(1).collect();
        debug!("Auto search results: {result:?}");
        return Ok(result);
    }

    let searchable_numbers: std::collections::HashSet<OrderedFloat<f64>> =
        searchable_issues
            .iter()
            .map(|issue| OrderedFloat(issue.calculated_issue_number))
            .collect();

    let mut chosen: Vec<MatchedSearchResult> = Vec::new();
    for mut result in search_results {
        // Determine what issues the result covers.
        let covered_range: IssueRange = if let Some(issue_number) =
            result.result.issue_number
        {
            issue_number
        } else if volume.special_version == SpecialVersion::VolumeAsIssue
            && result.result.special_version
                == Some(SpecialVersion::TradePaperBack)
        {
            match result.result.volume_number {
                Some(volume_number) => volume_number.as_issue_range(),
                None => continue,
            }
        } else if matches!(
            volume.special_version,
            SpecialVersion::OneShot
                | SpecialVersion::HardCover
                | SpecialVersion::TradePaperBack
        ) && (result.result.special_version
            == Some(volume.special_version)
            || result.result.special_version
                == Some(SpecialVersion::TradePaperBack))
        {
            IssueRange::Single(1.0)
        } else {
            continue;
        };

        let (start, end) = covered_range.as_range();
        let covered_issues =
            volumes.issues_in_range(volume_id, start, end).await?;
        if covered_issues.iter().any(|issue| {
            !searchable_numbers
                .contains(&OrderedFloat(issue.calculated_issue_number))
        }) {
            // Part of what the result covers is already downloaded.
            continue;
        }

        let overlaps = chosen.iter().any(|part| {
            part.covered_issues
                .is_some_and(|other| other.overlaps(&covered_range))
        });
        if !overlaps {
            result.covered_issues = Some(covered_range);
            chosen.push(result);
        }
    }

    // Issues the volume search didn't cover might still pop up when
    // searched for individually.
    let missing: Vec<IssueId> = searchable_issues
        .iter()
        .filter(|issue| {
            !chosen.iter().any(|part| {
                part.covered_issues.is_some_and(|covered| {
                    covered.contains(issue.calculated_issue_number)
                })
            })
        })
        .map(|issue| issue.id)
        .collect();

    for issue_id in missing {
        chosen.extend(
            auto_search_issue(
                database, settings, session, volume_id, issue_id,
            )
            .await?,
        );
    }

    debug!("Auto search results: {chosen:?}");
    Ok(chosen)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_queries_without_year() {
        let queries = build_queries(
            query_formats(SpecialVersion::Normal, false),
            "Invincible",
            1,
            None,
            None,
        );
        assert!(queries.contains(&"Invincible Vol. 1".to_string()));
        assert!(queries.contains(&"Invincible".to_string()));
        assert!(queries.iter().all(|q| !q.contains("{year}")));
    }

    #[test]
    fn test_build_queries_issue_search() {
        let queries = build_queries(
            query_formats(SpecialVersion::Normal, true),
            "Invincible",
            1,
            Some(2003),
            Some("5"),
        );
        assert_eq!(queries[0], "Invincible #5 (2003)");
    }

    #[test]
    fn test_gc_result_parsing() {
        let body = concat!(
            r#"<article><h1 class="post-title">"#,
            r#"<a href="https://getcomics.org/invincible-1">"#,
            "Invincible #1 (2003)</a></h1></article>",
        );
        let captures = GC_RESULT_REGEX.captures(body).unwrap();
        assert_eq!(&captures[1], "https://getcomics.org/invincible-1");
        assert_eq!(&captures[2], "Invincible #1 (2003)");
    }
}
