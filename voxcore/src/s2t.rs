//! Simplified→Traditional-Taiwan converter, applied segment-aware around kana runs so Japanese text embedded in
//! code-switched output is never touched.
//!
//! The phrase/character tables below are a representative `s2twp`-style
//! subset (phrase-level Taiwan-specific replacements take priority over
//! plain character substitution, e.g. `软件→軟體`), not a full OpenCC
//! dictionary — the mechanism, not the data volume, is what this module is
//! responsible for.

const PHRASES: &[(&str, &str)] = &[
    ("软件", "軟體"),
    ("硬件", "硬體"),
    ("网络", "網路"),
    ("内存", "記憶體"),
    ("硬盘", "硬碟"),
    ("鼠标", "滑鼠"),
    ("打印机", "印表機"),
    ("视频", "影片"),
    ("信息", "資訊"),
];

const CHARS: &[(char, char)] = &[
    ('爱', '愛'),
    ('编', '編'),
    ('学', '學'),
    ('国', '國'),
    ('语', '語'),
    ('认', '認'),
    ('识', '識'),
    ('数', '數'),
    ('据', '據'),
    ('点', '點'),
    ('会', '會'),
    ('间', '間'),
    ('问', '問'),
    ('题', '題'),
    ('这', '這'),
    ('发', '發'),
    ('说', '說'),
    ('为', '為'),
    ('么', '麼'),
    ('对', '對'),
    ('错', '錯'),
    ('个', '個'),
    ('们', '們'),
    ('时', '時'),
    ('现', '現'),
    ('实', '實'),
    ('开', '開'),
    ('关', '關'),
    ('张', '張'),
    ('电', '電'),
    ('号', '號'),
    ('叹', '嘆'),
    ('顿', '頓'),
];

fn is_kana(c: char) -> bool {
    matches!(c as u32, 0x3040..=0x30FF)
}

pub(crate) fn is_cjk(c: char) -> bool {
    matches!(c as u32, 0x4E00..=0x9FFF | 0x3400..=0x4DBF)
}

fn is_cjk_or_kana(c: char) -> bool {
    is_cjk(c) || is_kana(c)
}

/// Converts a run known to contain no kana: phrases first (longest-key
/// priority is implicit since the table only has 2-4 char entries checked
/// before falling back to per-character substitution), then leftover
/// characters one at a time.
fn convert_simplified_run(run: &str) -> String {
    let mut out = String::with_capacity(run.len());
    let mut rest = run;
    'outer: while !rest.is_empty() {
        for (simplified, traditional) in PHRASES {
            if rest.starts_with(simplified) {
                out.push_str(traditional);
                rest = &rest[simplified.len()..];
                continue 'outer;
            }
        }
        let mut chars = rest.chars();
        let c = chars.next().expect("rest is non-empty");
        let mapped = CHARS
            .iter()
            .find(|(s, _)| *s == c)
            .map(|(_, t)| *t)
            .unwrap_or(c);
        out.push(mapped);
        rest = chars.as_str();
    }
    out
}

/// Partitions `text` into CJK-or-kana runs and other runs, converting only
/// the former, and only when they contain no kana scalar.
pub fn convert_segment_aware(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut run = String::new();
    let mut run_is_cjk_class = false;

    let flush = |run: &mut String, out: &mut String, is_cjk_class: bool| {
        if run.is_empty() {
            return;
        }
        if is_cjk_class && !run.chars().any(is_kana) {
            out.push_str(&convert_simplified_run(run));
        } else {
            out.push_str(run);
        }
        run.clear();
    };

    for c in text.chars() {
        let this_is_cjk_class = is_cjk_or_kana(c);
        if !run.is_empty() && this_is_cjk_class != run_is_cjk_class {
            flush(&mut run, &mut out, run_is_cjk_class);
        }
        run_is_cjk_class = this_is_cjk_class;
        run.push(c);
    }
    flush(&mut run, &mut out, run_is_cjk_class);

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_plain_simplified_text() {
        assert_eq!(convert_segment_aware("我爱编程"), "我愛編程");
    }

    #[test]
    fn phrase_table_takes_priority_over_char_table() {
        assert_eq!(convert_segment_aware("软件"), "軟體");
    }

    #[test]
    fn kana_run_is_left_untouched() {
        // "爱" (simplified) next to hiragana "の" forms one CJK-or-kana run
        // that must be skipped entirely because it contains kana.
        assert_eq!(convert_segment_aware("爱のです"), "爱のです");
    }

    #[test]
    fn identity_on_ascii() {
        assert_eq!(convert_segment_aware("hello world"), "hello world");
    }
}
