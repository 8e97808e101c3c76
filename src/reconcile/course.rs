//! Course identifier helpers.
//!
//! Academic course ids have the shape `YYYY-quarter-CURRIC-NUM-SECT` (the
//! curriculum segment may itself contain dashes). Course groups encode the
//! same identity as `course_YYYYqtr-curricNUMsect`.

const QUARTERS: [(&str, &str); 4] = [
    ("win", "winter"),
    ("spr", "spring"),
    ("sum", "summer"),
    ("aut", "autumn"),
];

/// Whether a course id names an academic section, as opposed to an ad-hoc
/// course site. Only academic sections carry official enrollments.
pub fn is_academic_course_id(course_id: &str) -> bool {
    let parts: Vec<&str> = course_id.split('-').collect();
    if parts.len() < 5 {
        return false;
    }

    let year = parts[0];
    let quarter = parts[1];
    let number = parts[parts.len() - 2];
    let section = parts[parts.len() - 1];

    year.len() == 4
        && year.chars().all(|c| c.is_ascii_digit())
        && QUARTERS.iter().any(|(_, q)| *q == quarter)
        && number.len() == 3
        && number.chars().all(|c| c.is_ascii_digit())
        && !section.is_empty()
        && section.len() <= 2
        && section
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        && !parts[2..parts.len() - 2].is_empty()
}

/// Derive the academic course id encoded in a course group id, or `None`
/// when the group id is not a course group.
pub fn academic_course_id(group_id: &str) -> Option<String> {
    let rest = group_id.strip_prefix("course_")?;
    let (year, rest) = rest.split_at_checked(4)?;
    if !year.starts_with("20") || !year.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let (abbr, rest) = rest.split_at_checked(3)?;
    let quarter = QUARTERS.iter().find(|(a, _)| *a == abbr)?.1;
    let rest = rest.strip_prefix('-')?;

    // The curriculum runs up to the three-digit course number; the section
    // is whatever follows it.
    let digit_at = rest.find(|c: char| c.is_ascii_digit())?;
    let (curriculum, rest) = rest.split_at(digit_at);
    let (number, section) = rest.split_at_checked(3)?;
    if curriculum.is_empty()
        || !curriculum
            .chars()
            .all(|c| c.is_ascii_lowercase() || c == '-')
        || !number.chars().all(|c| c.is_ascii_digit())
    {
        return None;
    }

    let mut section_chars = section.chars();
    match section_chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return None,
    }
    match section_chars.next() {
        None => {}
        Some(c) if c.is_ascii_lowercase() || c.is_ascii_digit() => {
            if section_chars.next().is_some() {
                return None;
            }
        }
        Some(_) => return None,
    }

    Some(format!(
        "{}-{}-{}-{}-{}",
        year,
        quarter,
        curriculum.replace('-', " ").to_uppercase(),
        number,
        section.to_uppercase()
    ))
}
