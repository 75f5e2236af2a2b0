use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;

use crate::core::seo;
use crate::core::sheets::AffiliateProduct;

const CATEGORY_WEIGHT: u32 = 3;
const KEYWORD_WEIGHT: u32 = 1;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AdInsertion {
    pub content: String,
    pub products_used: usize,
    pub product_names: Vec<String>,
}

/// Relevance of one product to already-lowercased, tag-free content.
pub fn relevance(product: &AffiliateProduct, text: &str, keywords: &[String]) -> u32 {
    let categories = product
        .categories
        .iter()
        .filter(|c| !c.is_empty() && text.contains(c.as_str()))
        .count() as u32;

    let haystack = format!("{} {}", product.name, product.description).to_lowercase();
    let keyword_hits = keywords
        .iter()
        .filter(|k| !k.is_empty() && haystack.contains(&k.to_lowercase()))
        .count() as u32;

    categories * CATEGORY_WEIGHT + keyword_hits * KEYWORD_WEIGHT
}

/// Top `max` products by relevance; a random sample when nothing is relevant.
pub fn select_products<'a, R: Rng + ?Sized>(
    products: &'a [AffiliateProduct],
    content: &str,
    keywords: &[String],
    max: usize,
    rng: &mut R,
) -> Vec<&'a AffiliateProduct> {
    if max == 0 || products.is_empty() {
        return Vec::new();
    }
    let text = seo::strip_tags(content).to_lowercase();
    let mut scored: Vec<(u32, &AffiliateProduct)> = products
        .iter()
        .map(|p| (relevance(p, &text, keywords), p))
        .collect();
    // stable: equal scores keep spreadsheet order
    scored.sort_by(|a, b| b.0.cmp(&a.0));

    let relevant: Vec<&AffiliateProduct> = scored
        .iter()
        .filter(|(score, _)| *score > 0)
        .take(max)
        .map(|(_, p)| *p)
        .collect();
    if !relevant.is_empty() {
        return relevant;
    }
    products.choose_multiple(rng, max.min(products.len())).collect()
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn render_block(product: &AffiliateProduct) -> String {
    let name = escape_html(&product.name);
    let mut html = String::from("\n<div class=\"affiliate-product\">\n");
    if let Some(img) = &product.image_url {
        html.push_str(&format!(
            "  <img src=\"{}\" alt=\"{}\" loading=\"lazy\">\n",
            escape_html(img),
            name
        ));
    }
    html.push_str(&format!("  <h4>{}</h4>\n", name));
    if !product.description.is_empty() {
        html.push_str(&format!("  <p>{}</p>\n", escape_html(&product.description)));
    }
    if let Some(price) = &product.price {
        html.push_str(&format!("  <p class=\"price\">{}</p>\n", escape_html(price)));
    }
    html.push_str(&format!(
        "  <a href=\"{}\" target=\"_blank\" rel=\"sponsored nofollow noopener\">Shop Now</a>\n</div>\n",
        escape_html(&product.link)
    ));
    html
}

/// Byte offsets directly after each paragraph boundary.
pub fn insertion_points(content: &str) -> Vec<usize> {
    let lower = content.to_ascii_lowercase();
    let points: Vec<usize> = lower
        .match_indices("</p>")
        .map(|(i, m)| i + m.len())
        .collect();
    if !points.is_empty() {
        return points;
    }

    // Plain text: blank lines that sit outside any tag.
    let bytes = content.as_bytes();
    let mut points = Vec::new();
    let mut in_tag = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'<' => in_tag = true,
            b'>' => in_tag = false,
            b'\n' if !in_tag && bytes.get(i + 1) == Some(&b'\n') => {
                points.push(i + 1);
                i += 1;
            }
            _ => {}
        }
        i += 1;
    }
    points
}

/// Splice rendered blocks into `content`, spread evenly over the boundaries.
pub fn splice(content: &str, blocks: &[String]) -> String {
    if blocks.is_empty() {
        return content.to_string();
    }
    let points = insertion_points(content);
    if points.is_empty() {
        let mut out = content.to_string();
        for b in blocks {
            out.push_str(b);
        }
        return out;
    }

    let slots = blocks.len() + 1;
    let mut placements: Vec<(usize, &String)> = blocks
        .iter()
        .enumerate()
        .map(|(i, b)| {
            let idx = ((i + 1) * points.len() / slots).min(points.len() - 1);
            (points[idx], b)
        })
        .collect();
    placements.sort_by_key(|(pos, _)| *pos);

    let mut out = String::with_capacity(content.len() + blocks.iter().map(String::len).sum::<usize>());
    let mut cursor = 0;
    for (pos, block) in placements {
        out.push_str(&content[cursor..pos]);
        out.push_str(block);
        cursor = pos;
    }
    out.push_str(&content[cursor..]);
    out
}

pub fn insert_affiliate_ads_with<R: Rng + ?Sized>(
    content: &str,
    products: &[AffiliateProduct],
    keywords: &[String],
    max: usize,
    rng: &mut R,
) -> AdInsertion {
    let chosen = select_products(products, content, keywords, max, rng);
    let blocks: Vec<String> = chosen.iter().map(|p| render_block(p)).collect();
    AdInsertion {
        content: splice(content, &blocks),
        products_used: chosen.len(),
        product_names: chosen.iter().map(|p| p.name.clone()).collect(),
    }
}

pub fn insert_affiliate_ads(
    content: &str,
    products: &[AffiliateProduct],
    keywords: &[String],
    max: usize,
) -> AdInsertion {
    let result = insert_affiliate_ads_with(content, products, keywords, max, &mut rand::thread_rng());
    log::info!(
        "Inserted {} affiliate blocks (max {}, pool {})",
        result.products_used,
        max,
        products.len()
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn product(name: &str, desc: &str, cats: &[&str]) -> AffiliateProduct {
        AffiliateProduct {
            name: name.to_string(),
            description: desc.to_string(),
            link: format!("https://aff.test/{}", name.to_lowercase().replace(' ', "-")),
            image_url: None,
            categories: cats.iter().map(|c| c.to_string()).collect(),
            commission: None,
            price: None,
        }
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    const ARTICLE: &str = "<h1>Home workouts</h1><p>Fitness at home is easy.</p><p>Grab a mat.</p><p>Stretch daily.</p>";

    #[test]
    fn empty_pool_leaves_content_unchanged() {
        let out = insert_affiliate_ads_with(ARTICLE, &[], &[], 3, &mut rng());
        assert_eq!(out.content, ARTICLE);
        assert_eq!(out.products_used, 0);
    }

    #[test]
    fn relevance_weights_categories_over_keywords() {
        let text = "fitness at home with a yoga mat";
        let kw = vec!["mat".to_string()];
        assert_eq!(relevance(&product("Yoga Mat", "", &["fitness"]), text, &kw), 4);
        assert_eq!(relevance(&product("Mat Cleaner", "", &["cleaning"]), text, &kw), 1);
        assert_eq!(relevance(&product("Laptop", "", &["tech"]), text, &kw), 0);
    }

    #[test]
    fn picks_relevant_products_without_padding() {
        let products = vec![
            product("Laptop", "fast", &["tech"]),
            product("Yoga Mat", "grippy", &["fitness"]),
            product("Dumbbells", "iron", &["fitness"]),
            product("Blender", "smoothies", &["kitchen"]),
        ];
        let chosen = select_products(&products, ARTICLE, &[], 3, &mut rng());
        let names: Vec<_> = chosen.iter().map(|p| p.name.as_str()).collect();
        // ties keep sheet order; irrelevant products are not used as filler
        assert_eq!(names, vec!["Yoga Mat", "Dumbbells"]);
    }

    #[test]
    fn falls_back_to_random_sample_when_nothing_matches() {
        let products = vec![
            product("Laptop", "", &["tech"]),
            product("Blender", "", &["kitchen"]),
            product("Drill", "", &["tools"]),
        ];
        let chosen = select_products(&products, ARTICLE, &[], 2, &mut rng());
        assert_eq!(chosen.len(), 2);
        let out = insert_affiliate_ads_with(ARTICLE, &products, &[], 5, &mut rng());
        assert_eq!(out.products_used, 3);
    }

    #[test]
    fn never_exceeds_max() {
        let products: Vec<_> = (0..10)
            .map(|i| product(&format!("Item {}", i), "", &["fitness"]))
            .collect();
        for max in 0..5 {
            let out = insert_affiliate_ads_with(ARTICLE, &products, &[], max, &mut rng());
            assert_eq!(out.products_used, max);
            assert_eq!(out.content.matches("class=\"affiliate-product\"").count(), max);
        }
    }

    #[test]
    fn blocks_land_after_paragraphs() {
        let products = vec![product("Yoga Mat", "", &["fitness"])];
        let out = insert_affiliate_ads_with(ARTICLE, &products, &[], 1, &mut rng());
        let block_at = out.content.find("<div class=\"affiliate-product\">").unwrap();
        // three paragraphs, one block: after the second
        let second_p_end = ARTICLE.match_indices("</p>").nth(1).unwrap().0 + 4;
        assert_eq!(block_at, second_p_end + 1);
        assert!(out.content.ends_with("<p>Stretch daily.</p>"));
    }

    #[test]
    fn plain_text_uses_blank_lines_and_appends_without_boundary() {
        let points = insertion_points("one\n\ntwo\n\nthree");
        assert_eq!(points, vec![4, 9]);
        assert!(insertion_points("<a title=\"x\n\ny\">z</a>").is_empty());

        let out = splice("single line", &["[ad]".to_string()]);
        assert_eq!(out, "single line[ad]");
    }

    #[test]
    fn block_markup_is_escaped() {
        let mut p = product("Tom & Jerry <DVD>", "It's \"great\"", &[]);
        p.price = Some("$5".to_string());
        p.image_url = Some("https://img.test/a.jpg?x=1&y=2".to_string());
        let html = render_block(&p);
        assert!(html.contains("<h4>Tom &amp; Jerry &lt;DVD&gt;</h4>"));
        assert!(html.contains("It&#39;s &quot;great&quot;"));
        assert!(html.contains("x=1&amp;y=2"));
        assert!(html.contains("rel=\"sponsored nofollow noopener\">Shop Now</a>"));
        assert!(html.contains("<p class=\"price\">$5</p>"));
    }
}
