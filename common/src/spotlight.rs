//! Spotlight remap: spread a captured palette over the physical LED run,
//! lighting only the planned indices.

/// Parse a comma list of 1-based LED indices, keeping only `1..=max_leds`,
/// sorted and without duplicates.
pub fn normalize_plan(plan: &str, max_leds: usize) -> Vec<usize> {
    let mut indices = plan
        .split(',')
        .filter_map(|raw| raw.trim().parse::<usize>().ok())
        .filter(|index| (1..=max_leds).contains(index))
        .collect::<Vec<_>>();
    indices.sort_unstable();
    indices.dedup();
    indices
}

/// Build a `max_leds`-triplet color string. Each planned index takes the
/// original triplet at the same position, or the first original triplet when
/// the palette is shorter. Everything else stays dark.
///
/// Falls back to `original` unchanged when the result would not be a valid
/// command (wrong triplet count or a channel outside 0-255).
pub fn remap(original: &str, plan: &str, triplet_count: usize, max_leds: usize) -> String {
    let palette = palette(original, triplet_count);
    let mut leds = vec![[0i64; 3]; max_leds];

    for index in normalize_plan(plan, max_leds) {
        let source = palette.get(index - 1).or_else(|| palette.first());
        if let Some(rgb) = source {
            leds[index - 1] = *rgb;
        }
    }

    if !is_valid(&leds, max_leds) {
        return original.to_string();
    }

    leds.iter()
        .flat_map(|rgb| rgb.iter())
        .map(|value| value.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn palette(original: &str, triplet_count: usize) -> Vec<[i64; 3]> {
    let values = original
        .split(',')
        .map(|raw| raw.trim().parse::<i64>().unwrap_or(-1))
        .collect::<Vec<_>>();
    values
        .chunks_exact(3)
        .take(triplet_count)
        .map(|chunk| [chunk[0], chunk[1], chunk[2]])
        .collect()
}

fn is_valid(leds: &[[i64; 3]], max_leds: usize) -> bool {
    max_leds > 0
        && leds.len() == max_leds
        && leds
            .iter()
            .flat_map(|rgb| rgb.iter())
            .all(|value| (0..=255).contains(value))
}

pub fn triplet_count(colors: &str) -> usize {
    if colors.trim().is_empty() {
        return 0;
    }
    colors.split(',').count() / 3
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn short_palette_repeats_first_color() {
        let out = remap("10,20,30,40,50,60", "1,3", 2, 4);
        assert_eq!(out, "10,20,30,0,0,0,10,20,30,0,0,0");
    }

    #[test]
    fn planned_index_uses_matching_palette_entry() {
        let out = remap("10,20,30,40,50,60", "2", 2, 3);
        assert_eq!(out, "0,0,0,40,50,60,0,0,0");
    }

    #[test]
    fn plan_is_normalised() {
        assert_eq!(normalize_plan(" 5, 2,x,2,0,9,1 ", 6), vec![1, 2, 5]);
        assert!(normalize_plan("", 6).is_empty());
    }

    #[test]
    fn output_always_has_max_leds_triplets() {
        for max_leds in 1..40 {
            let out = remap("255,0,0", "1,7,13,400", 1, max_leds);
            assert_eq!(triplet_count(&out), max_leds);

            let lit = normalize_plan("1,7,13,400", max_leds);
            for (position, chunk) in out.split(',').collect::<Vec<_>>().chunks(3).enumerate() {
                if lit.contains(&(position + 1)) {
                    assert_eq!(chunk, ["255", "0", "0"]);
                } else {
                    assert_eq!(chunk, ["0", "0", "0"]);
                }
            }
        }
    }

    #[test]
    fn empty_palette_leaves_everything_dark() {
        assert_eq!(remap("", "1,2", 0, 2), "0,0,0,0,0,0");
    }

    #[test]
    fn invalid_results_return_original() {
        assert_eq!(remap("300,0,0", "1", 1, 2), "300,0,0");
        assert_eq!(remap("10,20,30", "1", 1, 0), "10,20,30");
    }
}
