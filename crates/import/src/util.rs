/// Edit distance over chars, so accented category names count one edit per letter.
pub fn levenshtein_distance(s1: &str, s2: &str) -> usize {
    let short: Vec<char>;
    let long: Vec<char>;
    if s1.chars().count() <= s2.chars().count() {
        short = s1.chars().collect();
        long = s2.chars().collect();
    } else {
        short = s2.chars().collect();
        long = s1.chars().collect();
    }
    if short.is_empty() {
        return long.len();
    }

    let mut row: Vec<usize> = (0..=short.len()).collect();
    for (i, lc) in long.iter().enumerate() {
        let mut diagonal = row[0];
        row[0] = i + 1;
        for (j, sc) in short.iter().enumerate() {
            let above = row[j + 1];
            row[j + 1] = (above + 1)
                .min(row[j] + 1)
                .min(diagonal + usize::from(lc != sc));
            diagonal = above;
        }
    }
    row[short.len()]
}

/// 1.0 for identical strings, falling towards 0.0 as edits approach the longer length.
pub fn similarity(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein_distance(a, b) as f64 / longest as f64
}
