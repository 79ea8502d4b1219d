//! Valid-record selection across ranking buckets

use serde::Serialize;

use super::notes::NoteOccurrence;
use super::project::has_project;
use crate::config::EnrichmentConfig;

/// How an occurrence is treated in the output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Enriched and written to the valid sheet
    Valid,
    /// Shown, but another occurrence represents the note
    Superseded,
    /// Title hits an exclusion keyword
    Excluded,
}

/// Whether selection needs the project attribution of this occurrence.
///
/// Only the primary-bucket first occurrence of a multi-bucket note depends on it.
pub fn needs_project(occ: &NoteOccurrence, bucket_count: usize, config: &EnrichmentConfig) -> bool {
    bucket_count > 1
        && occ.is_first
        && occ.bucket == config.primary_bucket
        && !config.is_excluded_title(&occ.note.title)
}

/// Decide the disposition of one occurrence.
///
/// `project` is the attribution looked up for the note, when one was needed.
pub fn disposition(
    occ: &NoteOccurrence,
    bucket_count: usize,
    project: Option<&str>,
    config: &EnrichmentConfig,
) -> Disposition {
    if config.is_excluded_title(&occ.note.title) {
        return Disposition::Excluded;
    }
    if !occ.is_first {
        return Disposition::Superseded;
    }
    if bucket_count <= 1 {
        return Disposition::Valid;
    }
    match project {
        Some(name) if occ.bucket == config.primary_bucket && !has_project(name) => {
            Disposition::Valid
        }
        _ => Disposition::Superseded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrichment::notes::{NoteEntry, NoteKind};
    use crate::enrichment::project::NO_PROJECT;

    fn occ(title: &str, bucket: i64, is_first: bool) -> NoteOccurrence {
        NoteOccurrence {
            note: NoteEntry {
                note_id: "n1".into(),
                title: title.into(),
                xsec_token: "t".into(),
                kind: NoteKind::Video,
                author_name: String::new(),
                fans: String::new(),
                created_at: None,
                status: String::new(),
                heat: "0".into(),
                interactions: "0".into(),
                comments: "0".into(),
            },
            bucket,
            hot_words: vec![],
            keywords: vec![],
            response_index: 0,
            is_first,
        }
    }

    #[test]
    fn single_bucket_first_occurrence_is_valid() {
        let cfg = EnrichmentConfig::default();
        assert_eq!(disposition(&occ("MINI", 2, true), 1, None, &cfg), Disposition::Valid);
        assert_eq!(
            disposition(&occ("MINI", 2, false), 1, None, &cfg),
            Disposition::Superseded
        );
    }

    #[test]
    fn multi_bucket_keeps_primary_without_project() {
        let cfg = EnrichmentConfig::default();
        let primary = occ("MINI", 1, true);
        let other = occ("MINI", 2, true);
        assert!(needs_project(&primary, 2, &cfg));
        assert!(!needs_project(&other, 2, &cfg));

        assert_eq!(
            disposition(&primary, 2, Some(NO_PROJECT), &cfg),
            Disposition::Valid
        );
        assert_eq!(
            disposition(&primary, 2, Some("Spring launch"), &cfg),
            Disposition::Superseded
        );
        assert_eq!(
            disposition(&other, 2, Some(NO_PROJECT), &cfg),
            Disposition::Superseded
        );
    }

    #[test]
    fn excluded_titles_win_over_everything() {
        let cfg = EnrichmentConfig::default();
        assert_eq!(
            disposition(&occ("二手 MINI", 1, true), 1, None, &cfg),
            Disposition::Excluded
        );
        assert!(!needs_project(&occ("二手 MINI", 1, true), 2, &cfg));
    }
}
