use super::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SelectorAttrCondition {
    Exists { key: String },
    Eq { key: String, value: String },
    StartsWith { key: String, value: String },
    EndsWith { key: String, value: String },
    Contains { key: String, value: String },
    Includes { key: String, value: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct SelectorStep {
    pub(crate) tag: Option<String>,
    pub(crate) universal: bool,
    pub(crate) id: Option<String>,
    pub(crate) classes: Vec<String>,
    pub(crate) attrs: Vec<SelectorAttrCondition>,
}

impl SelectorStep {
    pub(crate) fn id_only(&self) -> Option<&str> {
        if !self.universal && self.tag.is_none() && self.classes.is_empty() && self.attrs.is_empty()
        {
            self.id.as_deref()
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SelectorCombinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SelectorPart {
    pub(crate) step: SelectorStep,
    // Relation to previous (left) selector part.
    pub(crate) combinator: Option<SelectorCombinator>,
}

pub(crate) fn parse_selector_chain(selector: &str) -> Result<Vec<SelectorPart>> {
    let selector = selector.trim();
    if selector.is_empty() {
        return Err(Error::UnsupportedSelector(selector.into()));
    }

    let tokens = tokenize_selector(selector)?;
    let mut steps = Vec::new();
    let mut pending_combinator: Option<SelectorCombinator> = None;

    for token in tokens {
        if token == ">" {
            if pending_combinator.is_some() || steps.is_empty() {
                return Err(Error::UnsupportedSelector(selector.into()));
            }
            pending_combinator = Some(SelectorCombinator::Child);
            continue;
        }

        let step = parse_selector_step(&token)?;
        let combinator = if steps.is_empty() {
            None
        } else {
            Some(
                pending_combinator
                    .take()
                    .unwrap_or(SelectorCombinator::Descendant),
            )
        };
        steps.push(SelectorPart { step, combinator });
    }

    if steps.is_empty() || pending_combinator.is_some() {
        return Err(Error::UnsupportedSelector(selector.into()));
    }

    Ok(steps)
}

pub(crate) fn parse_selector_groups(selector: &str) -> Result<Vec<Vec<SelectorPart>>> {
    let groups = split_selector_groups(selector)?;
    let mut parsed = Vec::with_capacity(groups.len());
    for group in groups {
        parsed.push(parse_selector_chain(&group)?);
    }
    Ok(parsed)
}

pub(crate) fn split_selector_groups(selector: &str) -> Result<Vec<String>> {
    let mut groups = Vec::new();
    let mut current = String::new();
    let mut bracket_depth = 0usize;

    for ch in selector.chars() {
        match ch {
            '[' => {
                bracket_depth += 1;
                current.push(ch);
            }
            ']' => {
                if bracket_depth == 0 {
                    return Err(Error::UnsupportedSelector(selector.into()));
                }
                bracket_depth -= 1;
                current.push(ch);
            }
            ',' if bracket_depth == 0 => {
                let trimmed = current.trim();
                if trimmed.is_empty() {
                    return Err(Error::UnsupportedSelector(selector.into()));
                }
                groups.push(trimmed.to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }

    if bracket_depth != 0 {
        return Err(Error::UnsupportedSelector(selector.into()));
    }

    let trimmed = current.trim();
    if trimmed.is_empty() {
        return Err(Error::UnsupportedSelector(selector.into()));
    }
    groups.push(trimmed.to_string());
    Ok(groups)
}

pub(crate) fn tokenize_selector(selector: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut bracket_depth = 0usize;

    for ch in selector.chars() {
        match ch {
            '[' => {
                bracket_depth += 1;
                current.push(ch);
            }
            ']' => {
                if bracket_depth == 0 {
                    return Err(Error::UnsupportedSelector(selector.into()));
                }
                bracket_depth -= 1;
                current.push(ch);
            }
            '>' if bracket_depth == 0 => {
                if !current.trim().is_empty() {
                    tokens.push(current.trim().to_string());
                }
                current.clear();
                tokens.push(ch.to_string());
            }
            '+' | '~' if bracket_depth == 0 => {
                return Err(Error::UnsupportedSelector(selector.into()));
            }
            ch if ch.is_ascii_whitespace() && bracket_depth == 0 => {
                if !current.trim().is_empty() {
                    tokens.push(current.trim().to_string());
                }
                current.clear();
            }
            _ => current.push(ch),
        }
    }

    if bracket_depth != 0 {
        return Err(Error::UnsupportedSelector(selector.into()));
    }

    if !current.trim().is_empty() {
        tokens.push(current.trim().to_string());
    }

    Ok(tokens)
}

pub(crate) fn parse_selector_step(part: &str) -> Result<SelectorStep> {
    let part = part.trim();
    if part.is_empty() {
        return Err(Error::UnsupportedSelector(part.into()));
    }

    let bytes = part.as_bytes();
    let mut i = 0usize;
    let mut step = SelectorStep::default();

    while i < bytes.len() {
        match bytes[i] {
            b'*' => {
                if step.universal {
                    return Err(Error::UnsupportedSelector(part.into()));
                }
                step.universal = true;
                i += 1;
            }
            b'#' => {
                i += 1;
                let Some((id, next)) = parse_selector_ident(part, i) else {
                    return Err(Error::UnsupportedSelector(part.into()));
                };
                if step.id.replace(id).is_some() {
                    return Err(Error::UnsupportedSelector(part.into()));
                }
                i = next;
            }
            b'.' => {
                i += 1;
                let Some((class_name, next)) = parse_selector_ident(part, i) else {
                    return Err(Error::UnsupportedSelector(part.into()));
                };
                step.classes.push(class_name);
                i = next;
            }
            b'[' => {
                let (attr, next) = parse_selector_attr_condition(part, i)?;
                step.attrs.push(attr);
                i = next;
            }
            _ => {
                if step.tag.is_some()
                    || step.id.is_some()
                    || !step.classes.is_empty()
                    || step.universal
                {
                    return Err(Error::UnsupportedSelector(part.into()));
                }
                let Some((tag, next)) = parse_selector_ident(part, i) else {
                    return Err(Error::UnsupportedSelector(part.into()));
                };
                step.tag = Some(tag);
                i = next;
            }
        }
    }

    if step.tag.is_none()
        && step.id.is_none()
        && step.classes.is_empty()
        && step.attrs.is_empty()
        && !step.universal
    {
        return Err(Error::UnsupportedSelector(part.into()));
    }
    Ok(step)
}

pub(crate) fn parse_selector_ident(part: &str, start: usize) -> Option<(String, usize)> {
    let bytes = part.as_bytes();
    if start >= bytes.len() {
        return None;
    }
    let first = bytes[start];
    if !(first.is_ascii_alphabetic() || first == b'_' || first == b'-') {
        return None;
    }

    let mut i = start;
    while i < bytes.len()
        && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'-' || bytes[i] == b'_')
    {
        i += 1;
    }
    Some((part[start..i].to_string(), i))
}

fn parse_selector_attr_condition(part: &str, start: usize) -> Result<(SelectorAttrCondition, usize)> {
    let bytes = part.as_bytes();
    if bytes.get(start) != Some(&b'[') {
        return Err(Error::UnsupportedSelector(part.into()));
    }

    let mut i = start + 1;
    let mut quote: Option<u8> = None;
    let mut end = None;
    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' => match quote {
                Some(open) if open == bytes[i] => quote = None,
                Some(_) => {}
                None => quote = Some(bytes[i]),
            },
            b']' if quote.is_none() => {
                end = Some(i);
                break;
            }
            _ => {}
        }
        i += 1;
    }
    let Some(end) = end else {
        return Err(Error::UnsupportedSelector(part.into()));
    };

    let inner = part[start + 1..end].trim();
    if inner.is_empty() {
        return Err(Error::UnsupportedSelector(part.into()));
    }

    let operators = [
        ("^=", AttrOperator::StartsWith),
        ("$=", AttrOperator::EndsWith),
        ("*=", AttrOperator::Contains),
        ("~=", AttrOperator::Includes),
        ("=", AttrOperator::Eq),
    ];

    for (token, operator) in operators {
        if let Some(pos) = inner.find(token) {
            let key = inner[..pos].trim();
            let raw_value = inner[pos + token.len()..].trim();
            if key.is_empty() || !is_attr_key(key) {
                return Err(Error::UnsupportedSelector(part.into()));
            }
            let value = unquote_attr_value(raw_value)
                .ok_or_else(|| Error::UnsupportedSelector(part.to_string()))?;
            let key = key.to_string();
            let condition = match operator {
                AttrOperator::StartsWith => SelectorAttrCondition::StartsWith { key, value },
                AttrOperator::EndsWith => SelectorAttrCondition::EndsWith { key, value },
                AttrOperator::Contains => SelectorAttrCondition::Contains { key, value },
                AttrOperator::Includes => SelectorAttrCondition::Includes { key, value },
                AttrOperator::Eq => SelectorAttrCondition::Eq { key, value },
            };
            return Ok((condition, end + 1));
        }
    }

    if !is_attr_key(inner) {
        return Err(Error::UnsupportedSelector(part.into()));
    }
    Ok((
        SelectorAttrCondition::Exists {
            key: inner.to_string(),
        },
        end + 1,
    ))
}

enum AttrOperator {
    Eq,
    StartsWith,
    EndsWith,
    Contains,
    Includes,
}

fn is_attr_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b':')
}

fn unquote_attr_value(raw: &str) -> Option<String> {
    let bytes = raw.as_bytes();
    if bytes.len() >= 2 && (bytes[0] == b'"' || bytes[0] == b'\'') {
        if bytes[bytes.len() - 1] != bytes[0] {
            return None;
        }
        return Some(raw[1..raw.len() - 1].to_string());
    }
    if bytes.iter().any(|b| *b == b'"' || *b == b'\'') {
        return None;
    }
    Some(raw.to_string())
}

pub(crate) fn matches_chain(dom: &Dom, node: NodeId, parts: &[SelectorPart]) -> bool {
    let Some((last, prefix)) = parts.split_last() else {
        return false;
    };
    if !matches_step(dom, node, &last.step) {
        return false;
    }

    match last.combinator {
        None => true,
        Some(SelectorCombinator::Child) => match dom.parent(node) {
            Some(parent) if dom.element(parent).is_some() => matches_chain(dom, parent, prefix),
            _ => false,
        },
        Some(SelectorCombinator::Descendant) => {
            let mut cursor = dom.parent(node);
            while let Some(ancestor) = cursor {
                if dom.element(ancestor).is_some() && matches_chain(dom, ancestor, prefix) {
                    return true;
                }
                cursor = dom.parent(ancestor);
            }
            false
        }
    }
}

fn matches_step(dom: &Dom, node: NodeId, step: &SelectorStep) -> bool {
    let Some(element) = dom.element(node) else {
        return false;
    };

    if let Some(tag) = &step.tag {
        if !element.tag_name.eq_ignore_ascii_case(tag) {
            return false;
        }
    }

    if let Some(id) = &step.id {
        if element.attrs.get("id") != Some(id) {
            return false;
        }
    }

    for class_name in &step.classes {
        if !has_class(element, class_name) {
            return false;
        }
    }

    for condition in &step.attrs {
        if !matches_attr_condition(element, condition) {
            return false;
        }
    }

    true
}

fn matches_attr_condition(element: &Element, condition: &SelectorAttrCondition) -> bool {
    match condition {
        SelectorAttrCondition::Exists { key } => element.attrs.contains_key(key),
        SelectorAttrCondition::Eq { key, value } => {
            element.attrs.get(key).map(|v| v == value).unwrap_or(false)
        }
        SelectorAttrCondition::StartsWith { key, value } => {
            !value.is_empty()
                && element
                    .attrs
                    .get(key)
                    .map(|v| v.starts_with(value))
                    .unwrap_or(false)
        }
        SelectorAttrCondition::EndsWith { key, value } => {
            !value.is_empty()
                && element
                    .attrs
                    .get(key)
                    .map(|v| v.ends_with(value))
                    .unwrap_or(false)
        }
        SelectorAttrCondition::Contains { key, value } => {
            !value.is_empty()
                && element
                    .attrs
                    .get(key)
                    .map(|v| v.contains(value.as_str()))
                    .unwrap_or(false)
        }
        SelectorAttrCondition::Includes { key, value } => {
            !value.is_empty()
                && element
                    .attrs
                    .get(key)
                    .map(|v| v.split_ascii_whitespace().any(|token| token == value))
                    .unwrap_or(false)
        }
    }
}
