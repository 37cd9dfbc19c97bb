use nom::{
    branch::alt,
    bytes::complete::{tag_no_case, take_until, take_while1},
    character::complete::{char, digit1, multispace0},
    combinator::{map_res, opt},
    sequence::{delimited, preceded},
    IResult,
};

use crate::query::DisplayMode;

pub const DEFAULT_K: usize = 5;

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Command {
    Search {
        query: String,
        k: usize,
        display: DisplayMode,
    },
    Stats,
    Help,
    Exit,
}

// --- BASIC PARSERS ---

fn parse_usize(input: &str) -> IResult<&str, usize> {
    map_res(digit1, |s: &str| s.parse::<usize>())(input)
}

fn parse_quoted_string(input: &str) -> IResult<&str, String> {
    let (input, _) = char('"')(input)?;
    let (input, content) = take_until("\"")(input)?;
    let (input, _) = char('"')(input)?;
    Ok((input, content.to_string()))
}

fn parse_display_mode(input: &str) -> IResult<&str, DisplayMode> {
    let (rest, word) = take_while1(|c: char| c.is_ascii_alphanumeric())(input)?;
    match DisplayMode::parse(word) {
        Some(mode) => Ok((rest, mode)),
        None => Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Tag,
        ))),
    }
}

// --- HELPERS ---

fn ws<'a, F, O, E: nom::error::ParseError<&'a str>>(
    inner: F,
) -> impl FnMut(&'a str) -> IResult<&'a str, O, E>
where
    F: FnMut(&'a str) -> IResult<&'a str, O, E>,
{
    delimited(multispace0, inner, multispace0)
}

fn tag_ci(t: &'static str) -> impl FnMut(&str) -> IResult<&str, &str> {
    move |input| tag_no_case(t)(input)
}

// --- COMMAND PARSERS ---

fn parse_search(input: &str) -> IResult<&str, Command> {
    let (input, _) = alt((tag_ci("SEARCH"), tag_ci("FIND")))(input)?;
    let (input, query) = ws(parse_quoted_string)(input)?;

    // K= and DISPLAY= can appear in either order, each at most once.
    let (input, first_k) = opt(preceded(ws(tag_ci("K=")), parse_usize))(input)?;
    let (input, display) = opt(preceded(ws(tag_ci("DISPLAY=")), parse_display_mode))(input)?;
    let (input, second_k) = opt(preceded(ws(tag_ci("K=")), parse_usize))(input)?;

    Ok((
        input,
        Command::Search {
            query,
            k: first_k.or(second_k).unwrap_or(DEFAULT_K),
            display: display.unwrap_or(DisplayMode::Pretty),
        },
    ))
}

fn parse_stats(input: &str) -> IResult<&str, Command> {
    let (input, _) = alt((tag_ci("STATS"), tag_ci("STATUS")))(input)?;
    Ok((input, Command::Stats))
}

fn parse_help(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("HELP")(input)?;
    Ok((input, Command::Help))
}

fn parse_exit(input: &str) -> IResult<&str, Command> {
    let (input, _) = alt((tag_ci("EXIT"), tag_ci("QUIT")))(input)?;
    Ok((input, Command::Exit))
}

pub fn parse_command(input: &str) -> Result<Command, String> {
    let input = input.trim();
    let result = alt((parse_search, parse_stats, parse_help, parse_exit))(input);

    match result {
        Ok((remainder, cmd)) => {
            if !remainder.trim().is_empty() {
                return Err(format!("Unexpected tokens at end: '{}'", remainder.trim()));
            }
            Ok(cmd)
        }
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            // e.input is the slice where parsing stopped making progress
            let context = if e.input.len() > 20 {
                format!("{}...", &e.input[..20])
            } else {
                e.input.to_string()
            };
            Err(format!("Invalid syntax near: '{}'", context))
        }
        Err(nom::Err::Incomplete(_)) => Err("Incomplete command.".to_string()),
    }
}
