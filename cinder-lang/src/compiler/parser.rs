//! Reader for cinder source text.
//!
//! The reader only knows about atoms, strings and parenthesised lists; deciding
//! what a list means is left to the lowering pass in the parent module.

use chumsky::prelude::*;

use crate::utils::error::ReportableError;
use crate::utils::metadata::{Location, Span};

pub(crate) type ParseError<'src> = extra::Err<Rich<'src, char>>;

#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    Nil,
    Bool(bool),
    Number(f64),
    Str(String),
    Symbol(String),
    List(Vec<Spanned>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub datum: Datum,
    pub span: Span,
}

fn get_span<T: chumsky::span::Span<Offset = usize>>(e: T) -> Span {
    e.start()..e.end()
}

fn is_number_like(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_digit() => true,
        Some('-' | '+' | '.') => chars.next().is_some_and(|c| c.is_ascii_digit() || c == '.'),
        _ => false,
    }
}

fn classify_atom(s: &str) -> Result<Datum, String> {
    match s {
        "nil" => Ok(Datum::Nil),
        "true" => Ok(Datum::Bool(true)),
        "false" => Ok(Datum::Bool(false)),
        _ if is_number_like(s) => s
            .parse::<f64>()
            .map(Datum::Number)
            .map_err(|_| format!("malformed number `{s}`")),
        _ => Ok(Datum::Symbol(s.to_string())),
    }
}

fn datum_parser<'src>() -> impl Parser<'src, &'src str, Spanned, ParseError<'src>> + Clone {
    let comment = just(';').then(none_of('\n').repeated()).ignored();
    let pad = one_of(" \t\r\n")
        .ignored()
        .or(comment)
        .repeated()
        .ignored();

    recursive(move |datum| {
        let escape = just('\\').ignore_then(choice((
            just('n').to('\n'),
            just('t').to('\t'),
            just('"'),
            just('\\'),
        )));
        let string = none_of("\\\"")
            .or(escape)
            .repeated()
            .collect::<String>()
            .delimited_by(just('"'), just('"'))
            .map(Datum::Str)
            .labelled("string");

        let atom = none_of(" \t\r\n()\";")
            .repeated()
            .at_least(1)
            .to_slice()
            .try_map(|s: &str, span| classify_atom(s).map_err(|msg| Rich::custom(span, msg)))
            .labelled("atom");

        let list = datum
            .repeated()
            .collect::<Vec<_>>()
            .delimited_by(just('(').then(pad.clone()), just(')'))
            .map(Datum::List)
            .labelled("list");

        choice((string, list, atom))
            .map_with(|datum, e| Spanned {
                datum,
                span: get_span(e.span()),
            })
            .then_ignore(pad.clone())
    })
    .boxed()
}

fn program_parser<'src>() -> impl Parser<'src, &'src str, Vec<Spanned>, ParseError<'src>> {
    let comment = just(';').then(none_of('\n').repeated()).ignored();
    let pad = one_of(" \t\r\n").ignored().or(comment).repeated();
    pad.ignore_then(datum_parser().repeated().collect::<Vec<_>>())
        .then_ignore(end())
}

#[derive(Debug, Clone)]
pub struct ReadError {
    pub message: String,
    pub location: Location,
}
impl std::fmt::Display for ReadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}
impl std::error::Error for ReadError {}
impl ReportableError for ReadError {
    fn get_labels(&self) -> Vec<(Location, String)> {
        vec![(self.location.clone(), self.message.clone())]
    }
}

/// Read every top-level datum in `src`.
pub fn read(src: &str, path: &std::path::Path) -> Result<Vec<Spanned>, Vec<ReadError>> {
    program_parser().parse(src).into_result().map_err(|errs| {
        errs.into_iter()
            .map(|e| ReadError {
                message: e.to_string(),
                location: Location::new(get_span(*e.span()), path.to_path_buf()),
            })
            .collect()
    })
}

#[cfg(test)]
mod test {
    use super::*;

    fn read_ok(src: &str) -> Vec<Datum> {
        read(src, std::path::Path::new("test.cin"))
            .expect("should parse")
            .into_iter()
            .map(|s| s.datum)
            .collect()
    }

    #[test]
    fn atoms() {
        assert_eq!(
            read_ok("1 -2.5 nil true false foo -"),
            vec![
                Datum::Number(1.0),
                Datum::Number(-2.5),
                Datum::Nil,
                Datum::Bool(true),
                Datum::Bool(false),
                Datum::Symbol("foo".into()),
                Datum::Symbol("-".into()),
            ]
        );
    }

    #[test]
    fn nested_lists_and_comments() {
        let src = "; leading\n(a (b \"c\\n\") ) ; trailing\n()";
        let spanned = read(src, std::path::Path::new("test.cin")).expect("should parse");
        let res = spanned.iter().map(|s| s.datum.clone()).collect::<Vec<_>>();
        let Datum::List(items) = &res[0] else {
            panic!("expected list")
        };
        assert_eq!(items[0].datum, Datum::Symbol("a".into()));
        let Datum::List(inner) = &items[1].datum else {
            panic!("expected inner list")
        };
        assert_eq!(inner[1].datum, Datum::Str("c\n".into()));
        assert_eq!(res[1], Datum::List(vec![]));
        assert_eq!(&src[spanned[1].span.clone()], "()");
    }

    #[test]
    fn unterminated_list_is_an_error() {
        let errs = read("(define x", std::path::Path::new("bad.cin")).expect_err("should fail");
        assert!(!errs.is_empty());
        assert_eq!(errs[0].location.path, std::path::PathBuf::from("bad.cin"));
    }

    #[test]
    fn malformed_number_is_an_error() {
        assert!(read("(+ 1.2.3 4)", std::path::Path::new("bad.cin")).is_err());
    }
}
