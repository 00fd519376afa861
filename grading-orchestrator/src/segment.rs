//! Answer segmentation: turning OCR page text into one `AnswerSegment` per
//! question. No real layout-analysis model ships here (out of scope,
//! mirroring the OCR boundary) — this is a marker-based reference
//! implementation good enough to exercise the pipeline end to end.

use grading_types::{AnswerSegment, Exam, OcrPageResult, SubmissionId};
use regex::Regex;
use std::sync::OnceLock;

pub trait Segmenter: Send + Sync {
    fn segment(
        &self,
        submission_id: SubmissionId,
        exam: &Exam,
        ocr_results: &[OcrPageResult],
    ) -> Vec<AnswerSegment>;
}

fn question_marker() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| Regex::new(r"(?i)\bq(?:uestion)?\s*(\d+)\s*[:.)]").unwrap())
}

/// Splits concatenated OCR text on `Q<n>:` / `Question <n>.` markers and
/// assigns each chunk to the exam question at that 1-based position. Exams
/// whose pages carry no markers fall back to handing every question the
/// full concatenated text (better an over-broad segment than a dropped
/// answer).
pub struct MarkerSegmenter;

impl Segmenter for MarkerSegmenter {
    fn segment(
        &self,
        submission_id: SubmissionId,
        exam: &Exam,
        ocr_results: &[OcrPageResult],
    ) -> Vec<AnswerSegment> {
        let mut sorted = ocr_results.to_vec();
        sorted.sort_by_key(|page| page.page_index);

        let full_text: String = sorted
            .iter()
            .map(|page| page.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let all_pages: Vec<u32> = sorted.iter().map(|p| p.page_index).collect();
        let all_diagram_keys: Vec<String> = sorted.iter().map(|p| p.image_key.clone()).collect();

        let marker = question_marker();
        let matches: Vec<(usize, usize)> = marker
            .captures_iter(&full_text)
            .filter_map(|cap| {
                let number: usize = cap.get(1)?.as_str().parse().ok()?;
                let start = cap.get(0)?.end();
                Some((number, start))
            })
            .collect();

        if matches.is_empty() {
            return exam
                .questions
                .iter()
                .map(|question| AnswerSegment {
                    submission_id,
                    question_id: question.id,
                    text: full_text.clone(),
                    diagram_image_keys: question_diagram_keys(question, &all_diagram_keys),
                    source_pages: all_pages.clone(),
                })
                .collect();
        }

        let mut chunks: Vec<(usize, String)> = Vec::with_capacity(matches.len());
        for (idx, (number, start)) in matches.iter().enumerate() {
            let end = matches
                .get(idx + 1)
                .map(|(_, s)| *s)
                .unwrap_or(full_text.len());
            chunks.push((*number, full_text[*start..end].trim().to_string()));
        }

        exam.questions
            .iter()
            .enumerate()
            .map(|(idx, question)| {
                let text = chunks
                    .iter()
                    .find(|(number, _)| *number == idx + 1)
                    .map(|(_, text)| text.clone())
                    .unwrap_or_default();
                AnswerSegment {
                    submission_id,
                    question_id: question.id,
                    text,
                    diagram_image_keys: question_diagram_keys(question, &all_diagram_keys),
                    source_pages: all_pages.clone(),
                }
            })
            .collect()
    }
}

fn question_diagram_keys(
    question: &grading_types::Question,
    all_diagram_keys: &[String],
) -> Vec<String> {
    if question.answer_type == grading_types::AnswerType::Diagram {
        all_diagram_keys.to_vec()
    } else {
        Vec::new()
    }
}
