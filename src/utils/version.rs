//! 版本比较与范围匹配
//!
//! 实现模块运行时使用的点分数字版本模型：
//!
//! - 版本形如 `1.9.2` 或 `1.9.2-SNAPSHOT`，`-` 之后为限定符（qualifier）；
//! - 比较时按 `.` 拆分为整数分量，短的一方用 0 补齐，逐位比较；
//! - 范围表达式支持逗号分隔的多个备选项（任一匹配即可）、单个下限
//!   （`>=` 语义）以及 `下限 - 上限` 的闭区间；
//! - 分量末尾的 `*` 在下限位置重写为 0，在上限位置重写为最大整数，
//!   因此单独的 `1.2.*` 等价于 `[1.2.0, 1.2.MAX]`。
//!
//! 该语法无法用 semver 表达（通配区间、限定符剥离），故在此手工实现。

use std::cmp::Ordering;

/// 拆出数字部分与限定符。`1.9.2-SNAPSHOT` -> (`1.9.2`, Some(`SNAPSHOT`))
fn split_qualifier(version: &str) -> (&str, Option<&str>) {
    let version = version.trim();
    match version.find('-') {
        Some(idx) => (&version[..idx], Some(&version[idx + 1..])),
        None => (version, None),
    }
}

/// 把数字部分拆为整数分量。非数字或空分量按 0 处理，绝不 panic。
fn numeric_parts(numeric: &str) -> Vec<i64> {
    numeric
        .split('.')
        .map(|part| part.trim().parse::<i64>().unwrap_or(0))
        .collect()
}

/// 逐位比较两组分量，短的一方用 0 补齐。
fn compare_parts(a: &[i64], b: &[i64]) -> Ordering {
    let len = a.len().max(b.len());
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// 比较两个版本，忽略限定符。
///
/// `1.2` 与 `1.2.0` 相等，`1.10` 大于 `1.9`。
pub fn compare(a: &str, b: &str) -> Ordering {
    let (na, _) = split_qualifier(a);
    let (nb, _) = split_qualifier(b);
    compare_parts(&numeric_parts(na), &numeric_parts(nb))
}

/// 比较两个版本，数字部分相等时正式版排在带限定符的预发布版之上。
///
/// 两个都带限定符且数字相等时视为相等（限定符文本不参与排序）。
pub fn compare_with_qualifier(a: &str, b: &str) -> Ordering {
    let (na, qa) = split_qualifier(a);
    let (nb, qb) = split_qualifier(b);
    match compare_parts(&numeric_parts(na), &numeric_parts(nb)) {
        Ordering::Equal => match (qa, qb) {
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            _ => Ordering::Equal,
        },
        other => other,
    }
}

/// 判断版本是否落在范围表达式内。
///
/// 空范围表示无约束，恒为 `true`。匹配时忽略限定符。
pub fn matches(version: &str, range: &str) -> bool {
    let range = range.trim();
    if range.is_empty() {
        return true;
    }
    range
        .split(',')
        .any(|alt| matches_alternative(version, alt.trim()))
}

/// 单个备选项：区间、通配下限（隐含同前缀上限）或普通下限。
fn matches_alternative(version: &str, alt: &str) -> bool {
    if alt.is_empty() {
        return true;
    }
    if let Some((lower, upper)) = split_range(alt) {
        compare(version, &expand_wildcard(lower, false)) != Ordering::Less
            && compare(version, &expand_wildcard(upper, true)) != Ordering::Greater
    } else if alt.contains('*') {
        compare(version, &expand_wildcard(alt, false)) != Ordering::Less
            && compare(version, &expand_wildcard(alt, true)) != Ordering::Greater
    } else {
        compare(version, alt) != Ordering::Less
    }
}

/// 在备选项中寻找区间分隔符。
///
/// `-` 只有在其后（跳过空白）紧跟数字时才是区间分隔符，
/// 否则视为限定符前缀，如 `1.2.3-ALPHA - 1.3.0` 中的第一个 `-`。
fn split_range(alt: &str) -> Option<(&str, &str)> {
    for (idx, ch) in alt.char_indices() {
        if ch != '-' {
            continue;
        }
        let rest = alt[idx + 1..].trim_start();
        if rest.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false) {
            return Some((alt[..idx].trim_end(), rest));
        }
    }
    None
}

/// 展开边界末尾的 `*`：下限重写为 0，上限重写为最大整数。
fn expand_wildcard(bound: &str, upper: bool) -> String {
    let (numeric, _) = split_qualifier(bound);
    match numeric.strip_suffix('*') {
        Some(prefix) if upper => format!("{}{}", prefix, i64::MAX),
        Some(prefix) => format!("{}0", prefix),
        None => numeric.to_string(),
    }
}

/// 校验版本字符串的数字部分是否格式良好（每个分量均为十进制数字）。
pub fn is_well_formed(version: &str) -> bool {
    let (numeric, _) = split_qualifier(version);
    !numeric.is_empty()
        && numeric.split('.').all(|part| {
            let part = part.trim();
            !part.is_empty() && part.chars().all(|c| c.is_ascii_digit())
        })
}
