//! Workbook model
//!
//! Two sheets share one column layout: "Notes" lists every captured
//! occurrence, "Valid" lists enriched records by descending relevance.
//! Row styles carry the visual distinctions; rendering them is up to the sink.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::config::EnrichmentConfig;
use crate::enrichment::{Disposition, EnrichedRecord, EnrichmentReport, NoteIndex, NoteOccurrence};

pub const NOTES_SHEET: &str = "Notes";
pub const VALID_SHEET: &str = "Valid";

/// Background colours cycled through for notes present in several buckets
pub const MULTI_BUCKET_PALETTE: &[&str] = &[
    "FFE6FFE6", "FFFFE6E6", "FFE6E6FF", "FFFFF0E6", "FFE6FFFF", "FFFFE6FF",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Column {
    pub key: &'static str,
    pub header: &'static str,
    pub width: u16,
}

const fn col(key: &'static str, header: &'static str, width: u16) -> Column {
    Column { key, header, width }
}

pub const COLUMNS: &[Column] = &[
    col("noteId", "Note ID", 28),
    col("noteUrl", "Note URL", 28),
    col("title", "Title", 28),
    col("desc", "Description", 28),
    col("tags", "Tags", 28),
    col("type", "Type", 15),
    col("author", "Author", 15),
    col("fans", "Followers", 15),
    col("date", "Published", 15),
    col("status", "Status", 15),
    col("heat", "Heat", 15),
    col("likes", "Likes and saves", 15),
    col("comments", "Comments", 15),
    col("hotWords", "Top hot words (30 days)", 15),
    col("keywords", "Keywords", 15),
    col("listType", "Ranking", 15),
    col("relevanceScore", "Relevance score", 15),
    col("isRelevant", "Relevant", 15),
    col("reason", "Reason", 30),
    col("projectName", "Project", 30),
    col("commentCount", "Comment total", 15),
    col("relevantComments", "Comments text", 40),
    col("commentScores", "Comment score", 15),
    col("commentReasons", "Comment reason", 30),
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RowStyle {
    /// Not the representative occurrence: struck through, greyed
    pub superseded: bool,
    /// Title hit an exclusion keyword: grey fill, red title
    pub excluded: bool,
    /// Irrelevant or project-attributed valid record
    pub flagged: bool,
    /// Index into `MULTI_BUCKET_PALETTE`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub colour: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Row {
    pub cells: BTreeMap<&'static str, String>,
    pub style: RowStyle,
}

impl Row {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.cells.get(key).map(String::as_str)
    }

    fn set(&mut self, key: &'static str, value: impl Into<String>) {
        self.cells.insert(key, value.into());
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sheet {
    pub name: String,
    pub columns: Vec<Column>,
    pub rows: Vec<Row>,
}

impl Sheet {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            columns: COLUMNS.to_vec(),
            rows: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Workbook {
    pub sheets: Vec<Sheet>,
}

impl Workbook {
    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.name == name)
    }
}

fn occurrence_row(occ: &NoteOccurrence, config: &EnrichmentConfig) -> Row {
    let note = &occ.note;
    let mut row = Row::default();
    row.set("noteId", &note.note_id);
    row.set("noteUrl", note.canonical_url(&config.note_url_base));
    row.set("title", &note.title);
    row.set("desc", "");
    row.set("tags", "");
    row.set("type", note.kind.label());
    row.set("author", &note.author_name);
    row.set("fans", &note.fans);
    row.set("date", note.created_display());
    row.set("status", &note.status);
    row.set("heat", &note.heat);
    row.set("likes", &note.interactions);
    row.set("comments", &note.comments);
    row.set("hotWords", occ.hot_words.join("、"));
    row.set("keywords", occ.keywords.join("、"));
    row.set("listType", config.bucket_name(occ.bucket));
    row.set("projectName", "");
    row
}

fn record_row(record: &EnrichedRecord, config: &EnrichmentConfig) -> Row {
    let note = &record.note;
    let mut row = Row::default();
    row.set("noteId", &note.note_id);
    row.set("noteUrl", &record.note_url);
    row.set("title", &note.title);
    row.set("desc", &record.description);
    row.set("tags", &record.tags);
    row.set("type", note.kind.label());
    row.set("author", &note.author_name);
    row.set("fans", &note.fans);
    row.set("date", note.created_display());
    row.set("status", &note.status);
    row.set("heat", &note.heat);
    row.set("likes", &note.interactions);
    row.set("comments", &note.comments);
    row.set("hotWords", record.hot_words.join("、"));
    row.set("keywords", record.keywords.join("、"));
    row.set("listType", config.bucket_name(record.bucket));
    if let Some(verdict) = &record.relevance {
        row.set("relevanceScore", verdict.score.to_string());
        row.set("reason", &verdict.reason);
    }
    row.set(
        "isRelevant",
        if record.is_relevant() { "relevant" } else { "not relevant" },
    );
    row.set("projectName", &record.project_name);
    match &record.comment_summary {
        Some(summary) => {
            row.set("commentCount", summary.count.to_string());
            row.set("relevantComments", &summary.text);
            row.set("commentScores", summary.relevance.score.to_string());
            row.set("commentReasons", &summary.relevance.reason);
        }
        None => {
            row.set("commentCount", "0");
            row.set("commentScores", "0");
        }
    }
    row.style.flagged = record.is_flagged();
    row
}

/// Build the workbook; without a report the notes are listed as captured
pub fn build_workbook(
    index: &NoteIndex,
    report: Option<&EnrichmentReport>,
    config: &EnrichmentConfig,
) -> Workbook {
    let mut notes = Sheet::new(NOTES_SHEET);
    let mut valid = Sheet::new(VALID_SHEET);

    let Some(report) = report else {
        notes.rows = index
            .occurrences
            .iter()
            .map(|occ| occurrence_row(occ, config))
            .collect();
        return Workbook {
            sheets: vec![notes, valid],
        };
    };

    let colours: HashMap<&str, usize> = index
        .multi_bucket_ids()
        .into_iter()
        .enumerate()
        .map(|(i, id)| (id, i % MULTI_BUCKET_PALETTE.len()))
        .collect();

    let mut ordered: Vec<(&NoteOccurrence, Disposition)> = index
        .occurrences
        .iter()
        .zip(report.dispositions.iter().copied())
        .collect();
    ordered.sort_by(|a, b| a.0.note.note_id.cmp(&b.0.note.note_id));

    let details: HashMap<&str, &EnrichedRecord> = report
        .records
        .iter()
        .map(|r| (r.note.note_id.as_str(), r))
        .collect();

    for (occ, disposition) in ordered {
        let mut row = occurrence_row(occ, config);
        if let Some(record) = details.get(occ.note.note_id.as_str()) {
            row.set("desc", &record.description);
            row.set("tags", &record.tags);
        }
        row.style.excluded = disposition == Disposition::Excluded;
        row.style.superseded = !occ.is_first || disposition == Disposition::Superseded;
        row.style.colour = colours.get(occ.note.note_id.as_str()).copied();
        notes.rows.push(row);
    }

    valid.rows = report
        .records
        .iter()
        .map(|record| record_row(record, config))
        .collect();

    Workbook {
        sheets: vec![notes, valid],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CapturedPage;
    use crate::enrichment::NO_PROJECT;
    use crate::platform::Verdict;
    use serde_json::json;

    fn page(list_type: i64, ids: &[(&str, &str)]) -> CapturedPage {
        let notes: Vec<_> = ids
            .iter()
            .map(|(id, title)| {
                json!({
                    "note_info": {"note_id": id, "note_title": title, "note_type": 2, "xsec_token": "t"},
                    "author_info": {"author_name": "a", "fans_count": "10"},
                    "comment": 0
                })
            })
            .collect();
        CapturedPage {
            url: "https://a.test/api".into(),
            method: "POST".into(),
            request_type: "xhr".into(),
            page: 1,
            total_pages: 1,
            request_body: json!({"list_type": list_type}).to_string(),
            response_body: json!({"data": {"note_list": notes}}).to_string(),
            status_code: 200,
            headers: Default::default(),
            timestamp: 0,
            group_id: None,
            session_id: None,
        }
    }

    fn record(index: &NoteIndex, i: usize, score: f64, project: &str) -> EnrichedRecord {
        let occ = &index.occurrences[i];
        EnrichedRecord {
            note: occ.note.clone(),
            note_url: "u".into(),
            bucket: occ.bucket,
            hot_words: vec![],
            keywords: vec![],
            description: format!("desc of {}", occ.note.note_id),
            tags: "#t".into(),
            relevance: Some(Verdict::new(score > 0.5, score, "r")),
            project_name: project.into(),
            comment_summary: None,
        }
    }

    #[test]
    fn plain_export_lists_notes_in_capture_order() {
        let index = NoteIndex::from_pages(&[page(1, &[("b", "x"), ("a", "y")])]);
        let wb = build_workbook(&index, None, &EnrichmentConfig::default());
        let notes = wb.sheet(NOTES_SHEET).unwrap();
        let ids: Vec<_> = notes.rows.iter().map(|r| r.get("noteId").unwrap()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(notes.rows[0].get("listType"), Some("Heat ranking"));
        assert!(wb.sheet(VALID_SHEET).unwrap().rows.is_empty());
    }

    #[test]
    fn enriched_export_styles_and_backfills() {
        let index = NoteIndex::from_pages(&[
            page(1, &[("b", "MINI"), ("a", "二手 MINI")]),
            page(2, &[("b", "MINI")]),
        ]);
        let report = EnrichmentReport {
            records: vec![record(&index, 0, 0.9, NO_PROJECT)],
            dispositions: vec![
                Disposition::Valid,
                Disposition::Excluded,
                Disposition::Superseded,
            ],
            batches_done: 1,
            total_batches: 1,
            aborted: None,
        };
        let wb = build_workbook(&index, Some(&report), &EnrichmentConfig::default());

        let notes = wb.sheet(NOTES_SHEET).unwrap();
        let ids: Vec<_> = notes.rows.iter().map(|r| r.get("noteId").unwrap()).collect();
        assert_eq!(ids, vec!["a", "b", "b"]);
        assert!(notes.rows[0].style.excluded);
        assert_eq!(notes.rows[1].style.colour, Some(0));
        assert!(!notes.rows[1].style.superseded);
        assert!(notes.rows[2].style.superseded);
        assert_eq!(notes.rows[1].get("desc"), Some("desc of b"));

        let valid = wb.sheet(VALID_SHEET).unwrap();
        assert_eq!(valid.rows.len(), 1);
        assert_eq!(valid.rows[0].get("isRelevant"), Some("relevant"));
        assert!(!valid.rows[0].style.flagged);
    }

    #[test]
    fn project_attribution_flags_valid_rows() {
        let index = NoteIndex::from_pages(&[page(1, &[("a", "MINI")])]);
        let report = EnrichmentReport {
            records: vec![record(&index, 0, 0.9, "Spring")],
            dispositions: vec![Disposition::Valid],
            ..Default::default()
        };
        let wb = build_workbook(&index, Some(&report), &EnrichmentConfig::default());
        assert!(wb.sheet(VALID_SHEET).unwrap().rows[0].style.flagged);
    }
}
