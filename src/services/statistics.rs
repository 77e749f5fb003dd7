use std::collections::HashMap;
use std::hash::Hash;

pub fn present<T: Copy>(values: &[Option<T>]) -> Vec<T> {
    values.iter().flatten().copied().collect()
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

pub fn std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(var.sqrt())
}

pub fn sorted(values: &[f64]) -> Vec<f64> {
    let mut out = values.to_vec();
    out.sort_by(|a, b| a.total_cmp(b));
    out
}

// `sorted_values` must already be ascending
pub fn quantile(sorted_values: &[f64], q: f64) -> Option<f64> {
    if sorted_values.is_empty() {
        return None;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted_values.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f64;
    Some(sorted_values[lower] + (sorted_values[upper] - sorted_values[lower]) * frac)
}

pub fn median(values: &[f64]) -> Option<f64> {
    quantile(&sorted(values), 0.5)
}

pub fn pearson(a: &[Option<f64>], b: &[Option<f64>]) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = a
        .iter()
        .zip(b)
        .filter_map(|(x, y)| Some(((*x)?, (*y)?)))
        .collect();
    if pairs.len() < 2 {
        return None;
    }
    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let (mut cov, mut var_x, mut var_y) = (0.0, 0.0, 0.0);
    for (x, y) in &pairs {
        let dx = x - mean_x;
        let dy = y - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x == 0.0 || var_y == 0.0 {
        return None;
    }
    let r = cov / (var_x * var_y).sqrt();
    Some(r.clamp(-1.0, 1.0))
}

pub fn frequencies<K, I>(items: I) -> Vec<(K, usize)>
where
    K: Eq + Hash + Clone,
    I: IntoIterator<Item = K>,
{
    let mut index: HashMap<K, usize> = HashMap::new();
    let mut counts: Vec<(K, usize)> = Vec::new();
    for item in items {
        match index.get(&item) {
            Some(&slot) => counts[slot].1 += 1,
            None => {
                index.insert(item.clone(), counts.len());
                counts.push((item, 1));
            }
        }
    }
    // stable sort keeps encounter order among equal counts
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
}

pub fn mode<K, I>(items: I) -> Option<K>
where
    K: Eq + Hash + Clone,
    I: IntoIterator<Item = K>,
{
    frequencies(items).into_iter().next().map(|(k, _)| k)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_of_even_count_averages_middle() {
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn quartiles_interpolate_linearly() {
        let values = sorted(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(quantile(&values, 0.25), Some(1.75));
        assert_eq!(quantile(&values, 0.75), Some(3.25));
    }

    #[test]
    fn std_needs_two_values() {
        assert_eq!(std_dev(&[5.0]), None);
        assert_eq!(std_dev(&[2.0, 4.0]), Some(2f64.sqrt()));
    }

    #[test]
    fn pearson_detects_perfect_relationships() {
        let a = vec![Some(1.0), Some(2.0), Some(3.0), None];
        let b = vec![Some(2.0), Some(4.0), Some(6.0), Some(100.0)];
        let c = vec![Some(3.0), Some(2.0), Some(1.0), Some(0.0)];
        assert_eq!(pearson(&a, &b), Some(1.0));
        assert_eq!(pearson(&a, &c), Some(-1.0));
    }

    #[test]
    fn pearson_is_undefined_for_constant_input() {
        let a = vec![Some(1.0), Some(1.0), Some(1.0)];
        let b = vec![Some(1.0), Some(2.0), Some(3.0)];
        assert_eq!(pearson(&a, &b), None);
    }

    #[test]
    fn frequencies_break_ties_by_first_seen() {
        let counts = frequencies(vec!["b", "a", "c", "a", "b", "d"]);
        assert_eq!(counts, vec![("b", 2), ("a", 2), ("c", 1), ("d", 1)]);
    }

    #[test]
    fn mode_prefers_first_encountered_on_tie() {
        assert_eq!(mode(vec!["x", "y", "y", "x"]), Some("x"));
        assert_eq!(mode(Vec::<&str>::new()), None);
    }
}
