//! Shared text heuristics for Korean-first transcripts and reports.
//!
//! These helpers back the rule-based fallback paths and quality checks, so
//! they are deliberately simple: substring scans and small regexes rather
//! than any language-aware tokenization.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

/// Discourse fillers stripped when cleaning transcript text by rule.
pub const FILLER_WORDS: [&str; 9] = [
    "음", "어", "아", "그니까", "뭐", "저기", "그", "이제", "막",
];

/// Broad topic keywords scanned during rule-based utterance clustering.
pub const TOPIC_KEYWORDS: [&str; 23] = [
    "주식", "투자", "경제", "시장", "정치", "사회", "기술", "과학",
    "문화", "예술", "스포츠", "게임", "영화", "음악", "여행", "음식",
    "건강", "의료", "교육", "법률", "환경", "에너지", "부동산",
];

/// Topic keywords scanned when summarizing a finished report.
const REPORT_TOPICS: [&str; 16] = [
    "주식", "투자", "경제", "정치", "기술", "사회", "문화", "스포츠",
    "게임", "영화", "음악", "여행", "음식", "건강", "교육", "환경",
];

/// Content-type markers checked in order; the first type with a hit wins.
const CONTENT_TYPE_MARKERS: [(&str, [&str; 4]); 6] = [
    ("토론", ["토론", "논쟁", "찬반", "의견"]),
    ("강의", ["강의", "교육", "설명", "학습"]),
    ("인터뷰", ["인터뷰", "질문", "답변", "Q&A"]),
    ("뉴스", ["뉴스", "보도", "사건", "발표"]),
    ("리뷰", ["리뷰", "평가", "분석", "검토"]),
    ("브이로그", ["일상", "경험", "여행", "생활"]),
];

static RE_WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));
static RE_SENTENCE_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]+\s+").expect("valid sentence break regex"));
static RE_FILLER: LazyLock<Regex> = LazyLock::new(|| {
    // 그니까 must stay ahead of 그 so the longer filler wins the alternation.
    Regex::new(&format!(r"\b(?:{})\b\s*", FILLER_WORDS.join("|"))).expect("valid filler regex")
});
static RE_MARKDOWN_MARKS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[#*`>-]").expect("valid markdown marks regex"));
static RE_ASCII_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[a-zA-Z]+\b").expect("valid ascii word regex"));
static RE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d+\b").expect("valid number regex"));
static RE_PROPER_NOUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Z][a-z]+").expect("valid proper noun regex"));
static RE_H2_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^## ").expect("valid h2 regex"));
static RE_H3_TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^### (.+)$").expect("valid h3 title regex"));

/// Collapses runs of whitespace to single spaces and trims the ends.
pub fn collapse_whitespace(text: &str) -> String {
    RE_WHITESPACE.replace_all(text, " ").trim().to_string()
}

/// Splits text into sentences at `.`, `!`, `?` runs followed by whitespace.
pub fn split_sentences(text: &str) -> Vec<String> {
    RE_SENTENCE_BREAK
        .split(text)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Removes standalone filler words, then normalizes whitespace.
///
/// Word boundaries keep fillers like 그 from eating into words such as
/// 그리고.
pub fn strip_filler_words(text: &str) -> String {
    collapse_whitespace(&RE_FILLER.replace_all(text, ""))
}

/// Estimates length of mixed Korean/English text.
///
/// Korean counts per syllable, Latin words and digit runs per token, after
/// dropping Markdown punctuation so headings do not inflate the figure.
pub fn count_words(text: &str) -> usize {
    let stripped = RE_MARKDOWN_MARKS.replace_all(text, "");
    let clean = RE_WHITESPACE.replace_all(&stripped, " ");

    let korean_chars = clean.chars().filter(|c| ('가'..='힣').contains(c)).count();
    let ascii_words = RE_ASCII_WORD.find_iter(&clean).count();
    let numbers = RE_NUMBER.find_iter(&clean).count();

    korean_chars + ascii_words + numbers
}

/// Extracts rough topical keywords from an utterance.
///
/// Hits from [`TOPIC_KEYWORDS`] plus up to three capitalized Latin words,
/// collected into an ordered set so keyword groups compare deterministically.
pub fn extract_keywords(text: &str) -> BTreeSet<String> {
    let mut keywords: BTreeSet<String> = TOPIC_KEYWORDS
        .iter()
        .filter(|topic| text.contains(*topic))
        .map(|topic| (*topic).to_string())
        .collect();

    for m in RE_PROPER_NOUN.find_iter(text).take(3) {
        keywords.insert(m.as_str().to_string());
    }

    keywords
}

/// Guesses the content type of a report from marker keywords.
pub fn detect_content_type(text: &str) -> &'static str {
    for (content_type, markers) in &CONTENT_TYPE_MARKERS {
        if markers.iter().any(|marker| text.contains(marker)) {
            return content_type;
        }
    }
    "일반"
}

/// Lists the topics a report covers: H3 section titles first, then any
/// well-known topic keywords found in the body, capped at ten.
pub fn extract_report_topics(text: &str) -> Vec<String> {
    let mut topics: Vec<String> = RE_H3_TITLE
        .captures_iter(text)
        .map(|caps| caps[1].to_string())
        .collect();

    for topic in REPORT_TOPICS {
        if text.contains(topic) && !topics.iter().any(|t| t == topic) {
            topics.push(topic.to_string());
        }
    }

    topics.truncate(10);
    topics
}

/// Counts top-level report sections (`## ` headings).
pub fn count_h2_sections(text: &str) -> usize {
    RE_H2_HEADING.find_iter(text).count()
}

/// Share of duplicated sentence fragments, in `0.0..=1.0`.
///
/// Fragments are the raw pieces between `.`, `!`, `?` characters. Untrimmed
/// on purpose: near-duplicates differing only in layout still count as
/// distinct, which keeps the signal conservative.
pub fn repetition_ratio(text: &str) -> f64 {
    let fragments: Vec<&str> = text.split(['.', '!', '?']).collect();
    let unique: std::collections::HashSet<&str> = fragments.iter().copied().collect();
    1.0 - unique.len() as f64 / fragments.len().max(1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_filler_words_whole_words_only() {
        let cleaned = strip_filler_words("음 오늘은 그 주제에 대해, 그니까 그리고 시작하죠");
        assert!(!cleaned.contains("음"));
        assert!(!cleaned.contains("그니까"));
        // 그리고 starts with the filler 그 but must survive intact.
        assert!(cleaned.contains("그리고"));
        assert!(cleaned.contains("오늘은"));
    }

    #[test]
    fn test_split_sentences_drops_empty_pieces() {
        let sentences = split_sentences("첫 문장입니다. 둘째 문장!  셋째?! 넷째");
        assert_eq!(sentences.len(), 4);
        assert_eq!(sentences[0], "첫 문장입니다");
        assert_eq!(sentences[2], "셋째");
        assert_eq!(sentences[3], "넷째");

        assert!(split_sentences("").is_empty());
        assert!(split_sentences("   ").is_empty());
    }

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(collapse_whitespace("  a \n\n b\t c  "), "a b c");
        assert_eq!(collapse_whitespace(""), "");
    }

    #[test]
    fn test_count_words_mixed_script() {
        // 3 Korean syllables + 1 Latin word + 1 number.
        assert_eq!(count_words("가나다 abc 12"), 5);
        // Markdown punctuation is ignored.
        assert_eq!(count_words("## 가나다\n- abc 12"), 5);
        assert_eq!(count_words(""), 0);
    }

    #[test]
    fn test_extract_keywords_topics_and_proper_nouns() {
        let keywords = extract_keywords("오늘 주식 시장과 투자 심리를 Tesla 사례로 봅니다");
        assert!(keywords.contains("주식"));
        assert!(keywords.contains("시장"));
        assert!(keywords.contains("투자"));
        assert!(keywords.contains("Tesla"));
        assert_eq!(keywords.len(), 4);

        assert!(extract_keywords("별다른 키워드가 없는 문장").is_empty());
    }

    #[test]
    fn test_detect_content_type_first_marker_wins() {
        assert_eq!(detect_content_type("이번 강의에서는 개념을 설명합니다"), "강의");
        // 토론 markers are checked before 리뷰 markers.
        assert_eq!(detect_content_type("리뷰에 대한 찬반 토론"), "토론");
        assert_eq!(detect_content_type("아무 표지도 없는 글"), "일반");
    }

    #[test]
    fn test_extract_report_topics_titles_then_keywords() {
        let report = "# 보고서\n\n## 본문\n\n### 시장 전망\n\n주식과 투자 이야기";
        let topics = extract_report_topics(report);
        assert_eq!(topics[0], "시장 전망");
        assert!(topics.contains(&"주식".to_string()));
        assert!(topics.contains(&"투자".to_string()));
        assert!(topics.len() <= 10);
    }

    #[test]
    fn test_count_h2_sections() {
        assert_eq!(count_h2_sections("# 제목\n## 하나\n### 소제목\n## 둘"), 2);
        assert_eq!(count_h2_sections("본문뿐"), 0);
    }

    #[test]
    fn test_repetition_ratio() {
        assert!(repetition_ratio("가다. 가다. 가다. 가다.") > 0.3);
        assert!(repetition_ratio("하나. 둘. 셋.") < 0.3);
        assert_eq!(repetition_ratio(""), 0.0);
    }
}
