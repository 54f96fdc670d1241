//! Compiles a [`PostFilter`] into a parameterized listing query.
//!
//! Compilation is pure. Predicates are collected as [`Fragment`]s that keep
//! SQL text and bound values side by side; `$n` placeholders are numbered only
//! when the final statement is rendered, so conditionally added predicates can
//! never shift an argument out of place. No caller-supplied value is ever
//! written into the SQL text.

use std::fmt::Write as _;

use crate::domain::filter::{ColorPredicate, PostFilter, RANDOM_SEEDS, SortMode};

/// A value bound to one placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlArg {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    IntArray(Vec<i64>),
}

impl From<i64> for SqlArg {
    fn from(value: i64) -> Self {
        SqlArg::Int(value)
    }
}

impl From<i32> for SqlArg {
    fn from(value: i32) -> Self {
        SqlArg::Int(i64::from(value))
    }
}

impl From<f64> for SqlArg {
    fn from(value: f64) -> Self {
        SqlArg::Float(value)
    }
}

impl From<bool> for SqlArg {
    fn from(value: bool) -> Self {
        SqlArg::Bool(value)
    }
}

impl From<String> for SqlArg {
    fn from(value: String) -> Self {
        SqlArg::Text(value)
    }
}

impl From<&str> for SqlArg {
    fn from(value: &str) -> Self {
        SqlArg::Text(value.to_string())
    }
}

impl From<Vec<i64>> for SqlArg {
    fn from(value: Vec<i64>) -> Self {
        SqlArg::IntArray(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Piece {
    Sql(String),
    Arg(SqlArg),
}

/// SQL text interleaved with the values it binds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fragment {
    pieces: Vec<Piece>,
}

impl Fragment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sql(text: &str) -> Self {
        let mut fragment = Self::new();
        fragment.push(text);
        fragment
    }

    pub fn push(&mut self, text: &str) -> &mut Self {
        match self.pieces.last_mut() {
            Some(Piece::Sql(existing)) => existing.push_str(text),
            _ => self.pieces.push(Piece::Sql(text.to_string())),
        }
        self
    }

    pub fn push_arg(&mut self, arg: impl Into<SqlArg>) -> &mut Self {
        self.pieces.push(Piece::Arg(arg.into()));
        self
    }

    pub fn append(&mut self, other: Fragment) -> &mut Self {
        for piece in other.pieces {
            match piece {
                Piece::Sql(text) => {
                    self.push(&text);
                }
                Piece::Arg(arg) => {
                    self.pieces.push(Piece::Arg(arg));
                }
            }
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    /// Bound values in the order their placeholders will appear.
    pub fn args(&self) -> impl Iterator<Item = &SqlArg> {
        self.pieces.iter().filter_map(|piece| match piece {
            Piece::Arg(arg) => Some(arg),
            Piece::Sql(_) => None,
        })
    }

    /// Writes the text, numbering placeholders after the arguments already in `args`.
    pub fn render_into(self, sql: &mut String, args: &mut Vec<SqlArg>) {
        for piece in self.pieces {
            match piece {
                Piece::Sql(text) => sql.push_str(&text),
                Piece::Arg(arg) => {
                    args.push(arg);
                    let _ = write!(sql, "${}", args.len());
                }
            }
        }
    }

    pub fn render(self) -> (String, Vec<SqlArg>) {
        let mut sql = String::new();
        let mut args = Vec::new();
        self.render_into(&mut sql, &mut args);
        (sql, args)
    }

    fn joined(fragments: Vec<Fragment>, separator: &str) -> Fragment {
        let mut out = Fragment::new();
        for (index, fragment) in fragments.into_iter().enumerate() {
            if index > 0 {
                out.push(separator);
            }
            out.append(fragment);
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// Posts without any child rows still appear.
    LeftOuter,
    /// Only posts matched by the child filter appear.
    Inner,
}

impl JoinKind {
    fn for_filter(filter: &Option<Fragment>) -> Self {
        if filter.is_some() {
            JoinKind::Inner
        } else {
            JoinKind::LeftOuter
        }
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            JoinKind::LeftOuter => "LEFT OUTER JOIN",
            JoinKind::Inner => "INNER JOIN",
        }
    }
}

/// Structured compilation result, prior to rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct PostQuery {
    pub color_join: JoinKind,
    /// Set expression yielding the post ids that satisfy every color predicate.
    pub color_filter: Option<Fragment>,
    pub keyword_join: JoinKind,
    /// Set expression yielding the post ids carrying every requested keyword.
    pub keyword_filter: Option<Fragment>,
    /// AND-ed predicates over the post row.
    pub predicates: Vec<Fragment>,
    pub order_by: Fragment,
    pub limit: Option<i64>,
}

/// Final statement text and its arguments in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub args: Vec<SqlArg>,
}

const POST_COLUMNS: &str = "p.id, p.url, p.title, p.author, p.permalink, p.score, p.nsfw, \
    p.grayscale, p.sprocket, p.time, p.width, p.height, \
    p.low_url, p.low_width, p.low_height, \
    p.medium_url, p.medium_width, p.medium_height, \
    p.high_url, p.high_width, p.high_height";

const COLOR_AGGREGATES: &str = "ARRAY_AGG(hex ORDER BY percent DESC, id ASC) AS hexes, \
    ARRAY_AGG(css ORDER BY percent DESC, id ASC) AS csses, \
    ARRAY_AGG(html ORDER BY percent DESC, id ASC) AS htmls, \
    ARRAY_AGG(percent ORDER BY percent DESC, id ASC) AS percents";

const KEYWORD_AGGREGATES: &str = "ARRAY_AGG(word ORDER BY weight DESC, id ASC) AS words, \
    ARRAY_AGG(weight ORDER BY weight DESC, id ASC) AS weights";

pub fn compile(filter: &PostFilter) -> PostQuery {
    let color_filter = color_intersection(filter.colors());
    let keyword_filter = keyword_intersection(filter.keywords());

    PostQuery {
        color_join: JoinKind::for_filter(&color_filter),
        color_filter,
        keyword_join: JoinKind::for_filter(&keyword_filter),
        keyword_filter,
        predicates: predicates(filter),
        order_by: order_by(filter),
        limit: filter.limit(),
    }
}

impl PostQuery {
    pub fn where_clause(&self) -> Option<Fragment> {
        (!self.predicates.is_empty()).then(|| Fragment::joined(self.predicates.clone(), " AND "))
    }

    pub fn into_sql(self) -> CompiledQuery {
        let where_clause = self.where_clause();
        let PostQuery {
            color_join,
            color_filter,
            keyword_join,
            keyword_filter,
            predicates: _,
            order_by,
            limit,
        } = self;

        let mut statement = Fragment::sql("SELECT ");
        statement
            .push(POST_COLUMNS)
            .push(", c.hexes, c.csses, c.htmls, c.percents, k.words, k.weights")
            .push(", COUNT(*) OVER() AS total_count FROM posts p ")
            .push(color_join.as_sql())
            .push(" ")
            .append(aggregate("colors", COLOR_AGGREGATES, color_filter))
            .push(" c ON c.post_id = p.id ")
            .push(keyword_join.as_sql())
            .push(" ")
            .append(aggregate("keywords", KEYWORD_AGGREGATES, keyword_filter))
            .push(" k ON k.post_id = p.id");

        if let Some(where_clause) = where_clause {
            statement.push(" WHERE ").append(where_clause);
        }
        statement.push(" ORDER BY ").append(order_by);

        let (mut sql, args) = statement.render();
        if let Some(limit) = limit {
            let _ = write!(sql, " LIMIT {limit}");
        }
        CompiledQuery { sql, args }
    }
}

fn aggregate(table: &str, columns: &str, post_ids: Option<Fragment>) -> Fragment {
    let mut fragment = Fragment::sql("(SELECT post_id, ");
    fragment.push(columns).push(" FROM ").push(table);
    if let Some(post_ids) = post_ids {
        fragment
            .push(" WHERE post_id IN (")
            .append(post_ids)
            .push(")");
    }
    fragment.push(" GROUP BY post_id)");
    fragment
}

/// One sub-query per color so each threshold applies to that color alone.
fn color_intersection(colors: &[ColorPredicate]) -> Option<Fragment> {
    if colors.is_empty() {
        return None;
    }
    let subqueries = colors
        .iter()
        .map(|color| {
            let mut fragment = Fragment::sql("(SELECT post_id FROM colors WHERE html = ");
            fragment
                .push_arg(color.name.as_str())
                .push(" GROUP BY post_id, html HAVING SUM(percent) > ")
                .push_arg(color.min_percent)
                .push(")");
            fragment
        })
        .collect();
    Some(Fragment::joined(subqueries, " INTERSECT "))
}

fn keyword_intersection(keywords: &[String]) -> Option<Fragment> {
    if keywords.is_empty() {
        return None;
    }
    let subqueries = keywords
        .iter()
        .map(|word| {
            let mut fragment = Fragment::sql("(SELECT post_id FROM keywords WHERE word = ");
            fragment.push_arg(word.as_str()).push(")");
            fragment
        })
        .collect();
    Some(Fragment::joined(subqueries, " INTERSECT "))
}

fn seed_of(filter: &PostFilter) -> i64 {
    // Random filters are always constructed with a seed.
    filter.seed().unwrap_or(RANDOM_SEEDS[0])
}

fn predicates(filter: &PostFilter) -> Vec<Fragment> {
    let mut out = Vec::new();

    if let Some(cursor) = filter.cursor() {
        out.push(keyset_predicate(filter, cursor));
    }

    let flags = [
        ("p.nsfw = ", filter.nsfw()),
        ("p.grayscale = ", filter.grayscale()),
        ("p.sprocket = ", filter.sprocket()),
    ];
    for (column, value) in flags {
        if let Some(value) = value {
            let mut fragment = Fragment::sql(column);
            fragment.push_arg(value);
            out.push(fragment);
        }
    }

    if let Some(ids) = filter.ids() {
        let mut fragment = Fragment::sql("p.id = ANY(");
        fragment.push_arg(ids.to_vec()).push(")");
        out.push(fragment);
    }

    if let Some(title) = filter.title() {
        let mut fragment = Fragment::sql("p.title ILIKE ");
        fragment.push_arg(format!("%{}%", escape_like(title)));
        out.push(fragment);
    }

    if let Some(author) = filter.author() {
        let mut fragment = Fragment::sql("p.author = ");
        fragment.push_arg(author);
        out.push(fragment);
    }

    let width = filter.width();
    let height = filter.height();
    let ranges = [
        ("p.width >= ", width.min),
        ("p.width <= ", width.max),
        ("p.height >= ", height.min),
        ("p.height <= ", height.max),
    ];
    for (predicate, bound) in ranges {
        if let Some(bound) = bound {
            let mut fragment = Fragment::sql(predicate);
            fragment.push_arg(bound);
            out.push(fragment);
        }
    }

    let ratio = filter.aspect_ratio();
    for (operator, bound) in [(" >= ", ratio.min), (" <= ", ratio.max)] {
        if let Some(bound) = bound {
            let mut fragment = Fragment::sql("p.width::float8 / NULLIF(p.height, 0)");
            fragment.push(operator).push_arg(bound);
            out.push(fragment);
        }
    }

    out
}

fn keyset_predicate(filter: &PostFilter, cursor: i64) -> Fragment {
    let mut fragment = Fragment::new();
    match filter.sort() {
        SortMode::Time => {
            fragment.push("p.time < ").push_arg(cursor);
        }
        SortMode::Score => {
            fragment.push("p.score < ").push_arg(cursor);
        }
        SortMode::Random => {
            // Rows sharing the cursor's bucket continue in time order.
            let seed = seed_of(filter);
            fragment
                .push("(MOD(p.time, ")
                .push_arg(seed)
                .push(") > MOD(")
                .push_arg(cursor)
                .push(", ")
                .push_arg(seed)
                .push(") OR (MOD(p.time, ")
                .push_arg(seed)
                .push(") = MOD(")
                .push_arg(cursor)
                .push(", ")
                .push_arg(seed)
                .push(") AND p.time < ")
                .push_arg(cursor)
                .push("))");
        }
    }
    fragment
}

fn order_by(filter: &PostFilter) -> Fragment {
    match filter.sort() {
        SortMode::Time => Fragment::sql("p.time DESC, p.id DESC"),
        SortMode::Score => Fragment::sql("p.score DESC, p.time DESC, p.id DESC"),
        SortMode::Random => {
            let mut fragment = Fragment::sql("MOD(p.time, ");
            fragment
                .push_arg(seed_of(filter))
                .push(") ASC, p.time DESC, p.id DESC");
            fragment
        }
    }
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::filter::PostFilterParams;

    fn filter(params: PostFilterParams) -> PostFilter {
        PostFilter::new(params).expect("valid filter")
    }

    /// Placeholders must appear as $1..$n in text order with one argument each.
    fn assert_placeholders_sequential(compiled: &CompiledQuery) {
        let mut numbers = Vec::new();
        let bytes = compiled.sql.as_bytes();
        let mut index = 0;
        while index < bytes.len() {
            if bytes[index] == b'$' {
                let digits: String = compiled.sql[index + 1..]
                    .chars()
                    .take_while(char::is_ascii_digit)
                    .collect();
                index += digits.len();
                numbers.push(digits.parse::<usize>().expect("placeholder number"));
            }
            index += 1;
        }
        let expected: Vec<usize> = (1..=compiled.args.len()).collect();
        assert_eq!(numbers, expected, "sql: {}", compiled.sql);
    }

    #[test]
    fn empty_filter_is_unconstrained() {
        let compiled = compile(&PostFilter::default()).into_sql();

        assert!(compiled.args.is_empty());
        assert!(!compiled.sql.contains(" WHERE "));
        assert!(!compiled.sql.contains("LIMIT"));
        assert_eq!(compiled.sql.matches("LEFT OUTER JOIN").count(), 2);
        assert!(compiled.sql.contains("COUNT(*) OVER() AS total_count"));
        assert!(compiled.sql.ends_with("ORDER BY p.time DESC, p.id DESC"));
    }

    #[test]
    fn time_cursor_is_strict_upper_bound() {
        let compiled = compile(&filter(PostFilterParams {
            limit: Some(20),
            cursor: Some(1_700_000_000),
            ..Default::default()
        }))
        .into_sql();

        assert!(compiled.sql.contains(" WHERE p.time < $1 ORDER BY p.time DESC"));
        assert!(compiled.sql.ends_with(" LIMIT 20"));
        assert_eq!(compiled.args, [SqlArg::Int(1_700_000_000)]);
    }

    #[test]
    fn score_cursor_orders_by_score() {
        let compiled = compile(&filter(PostFilterParams {
            sort: Some(SortMode::Score),
            cursor: Some(250),
            ..Default::default()
        }))
        .into_sql();

        assert!(compiled.sql.contains("p.score < $1"));
        assert!(compiled.sql.contains("ORDER BY p.score DESC, p.time DESC"));
    }

    #[test]
    fn random_order_binds_seed_everywhere() {
        let compiled = compile(&filter(PostFilterParams {
            sort: Some(SortMode::Random),
            seed: Some(53),
            cursor: Some(1_650_000_000),
            limit: Some(10),
            ..Default::default()
        }))
        .into_sql();

        assert_placeholders_sequential(&compiled);
        assert!(compiled.sql.contains("ORDER BY MOD(p.time, $8) ASC, p.time DESC"));
        assert_eq!(
            compiled.args,
            [
                SqlArg::Int(53),
                SqlArg::Int(1_650_000_000),
                SqlArg::Int(53),
                SqlArg::Int(53),
                SqlArg::Int(1_650_000_000),
                SqlArg::Int(53),
                SqlArg::Int(1_650_000_000),
                SqlArg::Int(53),
            ]
        );
        assert!(!compiled.sql.contains("53"));
    }

    #[test]
    fn random_first_page_has_no_keyset() {
        let compiled = compile(&filter(PostFilterParams {
            sort: Some(SortMode::Random),
            seed: Some(19),
            ..Default::default()
        }))
        .into_sql();

        assert!(!compiled.sql.contains(" WHERE "));
        assert_eq!(compiled.args, [SqlArg::Int(19)]);
    }

    #[test]
    fn colors_intersect_per_color_thresholds() {
        let query = compile(&filter(PostFilterParams {
            colors: vec!["white".into(), "black".into()],
            min_color_percents: vec![0.2, 0.1],
            ..Default::default()
        }));

        assert_eq!(query.color_join, JoinKind::Inner);
        assert_eq!(query.keyword_join, JoinKind::LeftOuter);

        let (sql, args) = query.color_filter.clone().expect("color filter").render();
        assert_eq!(
            sql,
            "(SELECT post_id FROM colors WHERE html = $1 GROUP BY post_id, html HAVING SUM(percent) > $2) \
             INTERSECT (SELECT post_id FROM colors WHERE html = $3 GROUP BY post_id, html HAVING SUM(percent) > $4)"
        );
        assert_eq!(
            args,
            [
                SqlArg::Text("black".into()),
                SqlArg::Float(0.1),
                SqlArg::Text("white".into()),
                SqlArg::Float(0.2),
            ]
        );

        let compiled = query.into_sql();
        assert_placeholders_sequential(&compiled);
        assert!(compiled.sql.contains("INNER JOIN (SELECT post_id, ARRAY_AGG(hex"));
        assert!(compiled.sql.contains("LEFT OUTER JOIN (SELECT post_id, ARRAY_AGG(word"));
    }

    #[test]
    fn keywords_require_all_words() {
        let query = compile(&filter(PostFilterParams {
            keywords: vec!["street".into(), "night".into()],
            ..Default::default()
        }));

        assert_eq!(query.keyword_join, JoinKind::Inner);
        assert_eq!(query.color_join, JoinKind::LeftOuter);
        let (sql, args) = query.keyword_filter.expect("keyword filter").render();
        assert_eq!(
            sql,
            "(SELECT post_id FROM keywords WHERE word = $1) INTERSECT (SELECT post_id FROM keywords WHERE word = $2)"
        );
        assert_eq!(
            args,
            [SqlArg::Text("night".into()), SqlArg::Text("street".into())]
        );
    }

    #[test]
    fn child_filters_bind_before_row_predicates() {
        let compiled = compile(&filter(PostFilterParams {
            cursor: Some(99),
            keywords: vec!["film".into()],
            colors: vec!["black".into()],
            nsfw: Some(false),
            ..Default::default()
        }))
        .into_sql();

        assert_placeholders_sequential(&compiled);
        assert_eq!(
            compiled.args,
            [
                SqlArg::Text("black".into()),
                SqlArg::Float(0.0),
                SqlArg::Text("film".into()),
                SqlArg::Int(99),
                SqlArg::Bool(false),
            ]
        );
    }

    #[test]
    fn optional_predicates_are_parameterized() {
        let query = compile(&filter(PostFilterParams {
            title: Some("100%_'; DROP TABLE posts; --".into()),
            author: Some("alice".into()),
            ids: Some(vec![4, 2]),
            grayscale: Some(true),
            sprocket: Some(false),
            min_width: Some(1000),
            max_height: Some(3000),
            min_aspect_ratio: Some(1.5),
            ..Default::default()
        }));
        let where_sql = query.where_clause().expect("predicates").render().0;
        assert_eq!(
            where_sql,
            "p.grayscale = $1 AND p.sprocket = $2 AND p.id = ANY($3) AND p.title ILIKE $4 \
             AND p.author = $5 AND p.width >= $6 AND p.height <= $7 \
             AND p.width::float8 / NULLIF(p.height, 0) >= $8"
        );

        let compiled = query.into_sql();
        assert!(!compiled.sql.contains("DROP TABLE"));
        assert_eq!(compiled.args[2], SqlArg::IntArray(vec![2, 4]));
        assert_eq!(
            compiled.args[3],
            SqlArg::Text("%100\\%\\_'; DROP TABLE posts; --%".into())
        );
        assert_eq!(compiled.args[4], SqlArg::Text("u/alice".into()));
        assert_eq!(compiled.args[7], SqlArg::Float(1.5));
    }

    #[test]
    fn author_prefix_does_not_change_compilation() {
        let bare = compile(&filter(PostFilterParams {
            author: Some("alice".into()),
            ..Default::default()
        }));
        let prefixed = compile(&filter(PostFilterParams {
            author: Some("u/alice".into()),
            ..Default::default()
        }));
        assert_eq!(bare, prefixed);
    }

    #[test]
    fn compilation_is_deterministic() {
        let params = PostFilterParams {
            sort: Some(SortMode::Random),
            seed: Some(211),
            cursor: Some(5),
            colors: vec!["teal".into(), "olive".into()],
            keywords: vec!["b".into(), "a".into()],
            ..Default::default()
        };
        let first = compile(&filter(params.clone())).into_sql();
        let second = compile(&filter(params)).into_sql();
        assert_eq!(first, second);
    }

    #[test]
    fn empty_id_set_matches_nothing_rather_than_everything() {
        let compiled = compile(&PostFilter::by_ids(Vec::new())).into_sql();
        assert!(compiled.sql.contains("p.id = ANY($1)"));
        assert_eq!(compiled.args, [SqlArg::IntArray(Vec::new())]);
    }
}
