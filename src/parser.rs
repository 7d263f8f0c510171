use crate::{
    error::{Result, VelaError},
    lexer::{is_keyword, Lexeme, Token},
    operand::Type,
};

/// The grammar productions that can be evaluated on their own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Production {
    Sequence,
    BooleanExpression,
    NumericExpression,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    Sequence,
    Binding,
    WhileLoop,
    NamedFundef,
    AnonFundef,
    Formal,
    ReturnType,
    Selection,
    Disjunction,
    ExclusiveDisjunction,
    Conjunction,
    Negation,
    Relational,
    Shift,
    Additive,
    Multiplicative,
    Unary,
    Exponentiation,
    Funcall,
    List,
}

/// Generic parse tree: rule nodes with ordered children, terminals with the
/// token text and its position. Chain rules with a single child are collapsed
/// into that child.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseTree<'b> {
    Rule { rule: Rule, children: Vec<ParseTree<'b>> },
    Terminal(Lexeme<'b>),
}

impl<'b> ParseTree<'b> {
    fn rule(rule: Rule, children: Vec<ParseTree<'b>>) -> Self {
        Self::Rule { rule, children }
    }

    /// The leftmost token of the tree
    pub fn first_lexeme(&self) -> Option<&Lexeme<'b>> {
        match self {
            Self::Terminal(lexeme) => Some(lexeme),
            Self::Rule { children, .. } => children.iter().find_map(ParseTree::first_lexeme),
        }
    }
}

// How far into the tokens a parser got before giving up
#[derive(Debug, Clone, Copy)]
struct Failure {
    remaining: usize,
    expected: &'static str,
}

type ParseResult<'a, 'b, O> = std::result::Result<(&'a [Lexeme<'b>], O), Failure>;

fn fail<'a, 'b, O>(tokens: &'a [Lexeme<'b>], expected: &'static str) -> ParseResult<'a, 'b, O> {
    Err(Failure { remaining: tokens.len(), expected })
}

fn deeper(a: Failure, b: Failure) -> Failure {
    if b.remaining < a.remaining { b } else { a }
}

fn parse_token<'a, 'b: 'a>(
    expected: &'static str,
    recognizer: impl Fn(&Token<'b>) -> bool,
) -> impl Fn(&'a [Lexeme<'b>]) -> ParseResult<'a, 'b, ParseTree<'b>> {
    move |tokens| match tokens.first() {
        Some(lexeme) if recognizer(&lexeme.token) => Ok((&tokens[1..], ParseTree::Terminal(lexeme.clone()))),
        _ => fail(tokens, expected),
    }
}

fn parse_keyword<'a, 'b: 'a>(keyword: &'static str) -> impl Fn(&'a [Lexeme<'b>]) -> ParseResult<'a, 'b, ParseTree<'b>> {
    parse_token(keyword, move |token| token.is_keyword(keyword))
}

fn parse_surrounds<'a, 'b: 'a, O>(
    start_recognizer: impl Fn(&Token<'b>) -> bool,
    internal_parser: impl Fn(&'a [Lexeme<'b>]) -> ParseResult<'a, 'b, O>,
    end_recognizer: impl Fn(&Token<'b>) -> bool,
    end_expected: &'static str,
) -> impl Fn(&'a [Lexeme<'b>]) -> ParseResult<'a, 'b, O> {
    let start_parser = parse_token("an opening delimiter", start_recognizer);
    let end_parser = parse_token(end_expected, end_recognizer);

    move |tokens| {
        let (tokens, _) = start_parser(tokens)?;
        let (tokens, internal) = internal_parser(tokens)?;
        let (tokens, _) = end_parser(tokens)?;

        Ok((tokens, internal))
    }
}

fn parse_list<'a, 'b: 'a, O>(
    parser: impl Fn(&'a [Lexeme<'b>]) -> ParseResult<'a, 'b, O>,
) -> impl Fn(&'a [Lexeme<'b>]) -> ParseResult<'a, 'b, Vec<O>> {
    move |mut tokens| {
        let mut result = vec![];

        while let Ok((new_tokens, value)) = parser(tokens) {
            result.push(value);
            tokens = new_tokens
        }

        Ok((tokens, result))
    }
}

fn parse_either<'a, 'b: 'a, O>(
    a: impl Fn(&'a [Lexeme<'b>]) -> ParseResult<'a, 'b, O>,
    b: impl Fn(&'a [Lexeme<'b>]) -> ParseResult<'a, 'b, O>,
) -> impl Fn(&'a [Lexeme<'b>]) -> ParseResult<'a, 'b, O> {
    move |tokens| {
        let first = match a(tokens) {
            Ok(a) => return Ok(a),
            Err(failure) => failure,
        };
        b(tokens).map_err(|second| deeper(first, second))
    }
}

fn parse_optional<'a, 'b: 'a, O>(
    parser: impl Fn(&'a [Lexeme<'b>]) -> ParseResult<'a, 'b, O>,
) -> impl Fn(&'a [Lexeme<'b>]) -> ParseResult<'a, 'b, Option<O>> {
    move |tokens| match parser(tokens) {
        Ok((tokens, value)) => Ok((tokens, Some(value))),
        Err(_) => Ok((tokens, None)),
    }
}

fn parser_map<'a, 'b: 'a, I, O>(
    parser: impl Fn(&'a [Lexeme<'b>]) -> ParseResult<'a, 'b, I>,
    f: impl Fn(I) -> O,
) -> impl Fn(&'a [Lexeme<'b>]) -> ParseResult<'a, 'b, O> {
    move |tokens| {
        let (tokens, value) = parser(tokens)?;
        Ok((tokens, f(value)))
    }
}

// Left-associative chain of `operand (operator operand)*`
fn parse_chain<'a, 'b: 'a>(
    rule: Rule,
    operand: impl Fn(&'a [Lexeme<'b>]) -> ParseResult<'a, 'b, ParseTree<'b>>,
    operator: impl Fn(&Token<'b>) -> bool,
) -> impl Fn(&'a [Lexeme<'b>]) -> ParseResult<'a, 'b, ParseTree<'b>> {
    move |tokens| {
        let (mut tokens, first) = operand(tokens)?;
        let mut children = vec![first];

        while let Some(lexeme) = tokens.first().filter(|lexeme| operator(&lexeme.token)) {
            let (rest, next) = operand(&tokens[1..])?;
            children.push(ParseTree::Terminal(lexeme.clone()));
            children.push(next);
            tokens = rest;
        }

        if children.len() == 1 {
            return Ok((tokens, children.remove(0)));
        }
        Ok((tokens, ParseTree::rule(rule, children)))
    }
}

fn parse_symbol<'a, 'b: 'a>(tokens: &'a [Lexeme<'b>]) -> ParseResult<'a, 'b, ParseTree<'b>> {
    parse_token("a name", |token| matches!(token, Token::Identifier(text) if !is_keyword(text)))(tokens)
}

fn parse_type<'a, 'b: 'a>(tokens: &'a [Lexeme<'b>]) -> ParseResult<'a, 'b, ParseTree<'b>> {
    parse_token("a type", |token| matches!(token, Token::Identifier(text) if Type::from_name(text).is_some()))(tokens)
}

fn parse_literal<'a, 'b: 'a>(tokens: &'a [Lexeme<'b>]) -> ParseResult<'a, 'b, ParseTree<'b>> {
    parse_token("a literal", |token| match token {
        Token::Integer(_) | Token::Real(_) | Token::String(_) => true,
        token => token.is_keyword("TRUE") || token.is_keyword("FALSE"),
    })(tokens)
}

fn parse_block<'a, 'b: 'a>(tokens: &'a [Lexeme<'b>]) -> ParseResult<'a, 'b, ParseTree<'b>> {
    parse_surrounds(
        |token| matches!(token, Token::LeftBrace),
        parse_sequence,
        |token| matches!(token, Token::RightBrace),
        "'}'",
    )(tokens)
}

fn parse_formal<'a, 'b: 'a>(tokens: &'a [Lexeme<'b>]) -> ParseResult<'a, 'b, ParseTree<'b>> {
    let (tokens, name) = parse_symbol(tokens)?;
    let (tokens, _) = parse_token("':'", |token| matches!(token, Token::Colon))(tokens)?;
    let (tokens, kind) = parse_type(tokens)?;
    Ok((tokens, ParseTree::rule(Rule::Formal, vec![name, kind])))
}

fn parse_return_type<'a, 'b: 'a>(tokens: &'a [Lexeme<'b>]) -> ParseResult<'a, 'b, ParseTree<'b>> {
    let (tokens, _) = parse_token("':'", |token| matches!(token, Token::Colon))(tokens)?;
    parser_map(parse_type, |kind| ParseTree::rule(Rule::ReturnType, vec![kind]))(tokens)
}

// Formals, optional return type and body shared by both kinds of definition
fn parse_signature<'a, 'b: 'a>(tokens: &'a [Lexeme<'b>]) -> ParseResult<'a, 'b, Vec<ParseTree<'b>>> {
    let (tokens, mut children) = parse_surrounds(
        |token| matches!(token, Token::LeftParen),
        parse_list(parse_formal),
        |token| matches!(token, Token::RightParen),
        "')'",
    )(tokens)?;
    let (tokens, return_type) = parse_optional(parse_return_type)(tokens)?;
    let (tokens, body) = parse_block(tokens)?;

    children.extend(return_type);
    children.push(body);
    Ok((tokens, children))
}

fn parse_named_fundef<'a, 'b: 'a>(tokens: &'a [Lexeme<'b>]) -> ParseResult<'a, 'b, ParseTree<'b>> {
    let (tokens, name) = parse_symbol(tokens)?;
    let (tokens, mut children) = parse_signature(tokens)?;
    children.insert(0, name);
    Ok((tokens, ParseTree::rule(Rule::NamedFundef, children)))
}

fn parse_anon_fundef<'a, 'b: 'a>(tokens: &'a [Lexeme<'b>]) -> ParseResult<'a, 'b, ParseTree<'b>> {
    let (tokens, _) = parse_either(parse_keyword("FUNCTION"), parse_keyword("Λ"))(tokens)?;
    parser_map(parse_signature, |children| ParseTree::rule(Rule::AnonFundef, children))(tokens)
}

fn parse_list_literal<'a, 'b: 'a>(tokens: &'a [Lexeme<'b>]) -> ParseResult<'a, 'b, ParseTree<'b>> {
    parse_surrounds(
        |token| matches!(token, Token::LeftBracket),
        parser_map(parse_list(parse_expression), |elements| ParseTree::rule(Rule::List, elements)),
        |token| matches!(token, Token::RightBracket),
        "']'",
    )(tokens)
}

fn parse_parenthesized<'a, 'b: 'a>(tokens: &'a [Lexeme<'b>]) -> ParseResult<'a, 'b, ParseTree<'b>> {
    parse_surrounds(
        |token| matches!(token, Token::LeftParen),
        parse_expression,
        |token| matches!(token, Token::RightParen),
        "')'",
    )(tokens)
}

fn parse_funcall<'a, 'b: 'a>(tokens: &'a [Lexeme<'b>]) -> ParseResult<'a, 'b, ParseTree<'b>> {
    let (tokens, function) = parse_either(parse_symbol, parse_either(parse_anon_fundef, parse_parenthesized))(tokens)?;
    let (tokens, arguments) = parse_surrounds(
        |token| matches!(token, Token::LeftParen),
        parse_list(parse_expression),
        |token| matches!(token, Token::RightParen),
        "')'",
    )(tokens)?;

    let mut children = vec![function];
    children.extend(arguments);
    Ok((tokens, ParseTree::rule(Rule::Funcall, children)))
}

fn parse_factor<'a, 'b: 'a>(tokens: &'a [Lexeme<'b>]) -> ParseResult<'a, 'b, ParseTree<'b>> {
    parse_either(
        parse_funcall,
        parse_either(
            parse_anon_fundef,
            parse_either(
                parse_parenthesized,
                parse_either(parse_list_literal, parse_either(parse_literal, parse_symbol)),
            ),
        ),
    )(tokens)
}

fn parse_exponentiation<'a, 'b: 'a>(tokens: &'a [Lexeme<'b>]) -> ParseResult<'a, 'b, ParseTree<'b>> {
    // Right associative: the exponent is itself a unary expression
    let (tokens, base) = parse_factor(tokens)?;
    match tokens.first() {
        Some(lexeme) if lexeme.token == Token::Caret => {
            let (rest, exponent) = parse_unary(&tokens[1..])?;
            let caret = ParseTree::Terminal(lexeme.clone());
            Ok((rest, ParseTree::rule(Rule::Exponentiation, vec![base, caret, exponent])))
        }
        _ => Ok((tokens, base)),
    }
}

fn parse_unary<'a, 'b: 'a>(tokens: &'a [Lexeme<'b>]) -> ParseResult<'a, 'b, ParseTree<'b>> {
    match tokens.first() {
        Some(lexeme) if lexeme.token == Token::Minus => {
            let (rest, operand) = parse_exponentiation(&tokens[1..])?;
            Ok((rest, ParseTree::rule(Rule::Unary, vec![ParseTree::Terminal(lexeme.clone()), operand])))
        }
        _ => parse_exponentiation(tokens),
    }
}

fn parse_multiplicative<'a, 'b: 'a>(tokens: &'a [Lexeme<'b>]) -> ParseResult<'a, 'b, ParseTree<'b>> {
    parse_chain(Rule::Multiplicative, parse_unary, |token| matches!(token, Token::Star | Token::Slash))(tokens)
}

fn parse_additive<'a, 'b: 'a>(tokens: &'a [Lexeme<'b>]) -> ParseResult<'a, 'b, ParseTree<'b>> {
    parse_chain(Rule::Additive, parse_multiplicative, |token| matches!(token, Token::Plus | Token::Minus))(tokens)
}

fn parse_shift<'a, 'b: 'a>(tokens: &'a [Lexeme<'b>]) -> ParseResult<'a, 'b, ParseTree<'b>> {
    parse_chain(Rule::Shift, parse_additive, |token| matches!(token, Token::ShiftLeft | Token::ShiftRight))(tokens)
}

fn is_relational_operator(token: &Token) -> bool {
    matches!(
        token,
        Token::Equal
            | Token::NotEqual
            | Token::Less
            | Token::Greater
            | Token::LessEqual
            | Token::GreaterEqual
            | Token::Approximately
    ) || token.is_keyword("IN")
}

fn parse_relational<'a, 'b: 'a>(tokens: &'a [Lexeme<'b>]) -> ParseResult<'a, 'b, ParseTree<'b>> {
    // At most one relational operator, `1 < 2 < 3` is not an expression
    let (tokens, left) = parse_shift(tokens)?;
    match tokens.first() {
        Some(lexeme) if is_relational_operator(&lexeme.token) => {
            let (rest, right) = parse_shift(&tokens[1..])?;
            let operator = ParseTree::Terminal(lexeme.clone());
            Ok((rest, ParseTree::rule(Rule::Relational, vec![left, operator, right])))
        }
        _ => Ok((tokens, left)),
    }
}

fn parse_negation<'a, 'b: 'a>(tokens: &'a [Lexeme<'b>]) -> ParseResult<'a, 'b, ParseTree<'b>> {
    match tokens.first() {
        Some(lexeme) if lexeme.token.is_keyword("NOT") => {
            let (rest, operand) = parse_relational(&tokens[1..])?;
            Ok((rest, ParseTree::rule(Rule::Negation, vec![ParseTree::Terminal(lexeme.clone()), operand])))
        }
        _ => parse_relational(tokens),
    }
}

fn parse_conjunction<'a, 'b: 'a>(tokens: &'a [Lexeme<'b>]) -> ParseResult<'a, 'b, ParseTree<'b>> {
    parse_chain(Rule::Conjunction, parse_negation, |token| token.is_keyword("AND"))(tokens)
}

fn parse_exclusive_disjunction<'a, 'b: 'a>(tokens: &'a [Lexeme<'b>]) -> ParseResult<'a, 'b, ParseTree<'b>> {
    parse_chain(Rule::ExclusiveDisjunction, parse_conjunction, |token| token.is_keyword("XOR"))(tokens)
}

fn parse_boolean_expression<'a, 'b: 'a>(tokens: &'a [Lexeme<'b>]) -> ParseResult<'a, 'b, ParseTree<'b>> {
    parse_chain(Rule::Disjunction, parse_exclusive_disjunction, |token| token.is_keyword("OR"))(tokens)
}

fn parse_consequent<'a, 'b: 'a>(tokens: &'a [Lexeme<'b>]) -> ParseResult<'a, 'b, ParseTree<'b>> {
    parse_either(parse_block, parse_expression)(tokens)
}

fn parse_when_pair<'a, 'b: 'a>(tokens: &'a [Lexeme<'b>]) -> ParseResult<'a, 'b, Vec<ParseTree<'b>>> {
    let (tokens, condition) = parse_boolean_expression(tokens)?;
    let (tokens, _) = parse_token("'->'", |token| matches!(token, Token::RightArrow))(tokens)?;
    let (tokens, consequent) = parse_consequent(tokens)?;
    Ok((tokens, vec![condition, consequent]))
}

fn parse_when<'a, 'b: 'a>(tokens: &'a [Lexeme<'b>]) -> ParseResult<'a, 'b, ParseTree<'b>> {
    let (tokens, _) = parse_keyword("WHEN")(tokens)?;
    let (tokens, first) = parse_when_pair(tokens)?;
    let (tokens, rest) = parse_list(parse_when_pair)(tokens)?;

    let children = first.into_iter().chain(rest.into_iter().flatten()).collect();
    Ok((tokens, ParseTree::rule(Rule::Selection, children)))
}

fn parse_if<'a, 'b: 'a>(tokens: &'a [Lexeme<'b>]) -> ParseResult<'a, 'b, ParseTree<'b>> {
    let (tokens, _) = parse_keyword("IF")(tokens)?;
    let (tokens, condition) = parse_boolean_expression(tokens)?;
    let (tokens, _) = parse_keyword("THEN")(tokens)?;
    let (tokens, consequent) = parse_consequent(tokens)?;

    let mut children = vec![condition, consequent];
    let (tokens, alternative) = parse_optional(|tokens| {
        let (tokens, _) = parse_keyword("ELSE")(tokens)?;
        parse_consequent(tokens)
    })(tokens)?;
    // An odd child count means the last one is the else branch
    children.extend(alternative);

    Ok((tokens, ParseTree::rule(Rule::Selection, children)))
}

fn parse_expression<'a, 'b: 'a>(tokens: &'a [Lexeme<'b>]) -> ParseResult<'a, 'b, ParseTree<'b>> {
    parse_either(parse_when, parse_either(parse_if, parse_boolean_expression))(tokens)
}

fn parse_binding<'a, 'b: 'a>(tokens: &'a [Lexeme<'b>]) -> ParseResult<'a, 'b, ParseTree<'b>> {
    let (tokens, name) = parse_symbol(tokens)?;
    let (tokens, binder) = parse_either(
        parse_token("'<-'", |token| matches!(token, Token::LeftArrow)),
        parse_keyword("IS"),
    )(tokens)?;
    let (tokens, value) = parse_expression(tokens)?;
    Ok((tokens, ParseTree::rule(Rule::Binding, vec![name, binder, value])))
}

fn parse_while<'a, 'b: 'a>(tokens: &'a [Lexeme<'b>]) -> ParseResult<'a, 'b, ParseTree<'b>> {
    let (tokens, _) = parse_keyword("WHILE")(tokens)?;
    let (tokens, condition) = parse_boolean_expression(tokens)?;
    let (tokens, body) = parse_block(tokens)?;
    Ok((tokens, ParseTree::rule(Rule::WhileLoop, vec![condition, body])))
}

fn parse_statement<'a, 'b: 'a>(tokens: &'a [Lexeme<'b>]) -> ParseResult<'a, 'b, ParseTree<'b>> {
    if let Some(lexeme) = tokens.first().filter(|lexeme| matches!(lexeme.token, Token::Doc(_))) {
        return match parse_named_fundef(&tokens[1..]) {
            Ok((rest, ParseTree::Rule { rule, mut children })) => {
                children.insert(0, ParseTree::Terminal(lexeme.clone()));
                Ok((rest, ParseTree::rule(rule, children)))
            }
            _ => parse_statement(&tokens[1..]),
        };
    }

    parse_either(
        parse_binding,
        parse_either(parse_while, parse_either(parse_named_fundef, parse_expression)),
    )(tokens)
}

fn parse_sequence<'a, 'b: 'a>(tokens: &'a [Lexeme<'b>]) -> ParseResult<'a, 'b, ParseTree<'b>> {
    parser_map(parse_list(parse_statement), |statements| ParseTree::rule(Rule::Sequence, statements))(tokens)
}

fn to_error(lexemes: &[Lexeme], failure: Failure) -> VelaError {
    let index = lexemes.len() - failure.remaining;
    match lexemes.get(index) {
        Some(lexeme) => VelaError::parse(
            format!("expected {} but found '{}'", failure.expected, lexeme.token.text()),
            lexeme.line,
            lexeme.column,
        ),
        None => {
            let (line, column) = lexemes.last().map(|lexeme| (lexeme.line, lexeme.column)).unwrap_or((1, 1));
            VelaError::parse(format!("expected {} but reached the end of input", failure.expected), line, column)
        }
    }
}

/// Parses a token stream as the given production. The whole stream must be
/// consumed.
pub fn parse<'b>(lexemes: &[Lexeme<'b>], production: Production) -> Result<ParseTree<'b>> {
    // Doc strings only attach to a following named definition
    let lexemes: Vec<Lexeme<'b>> = lexemes.iter().enumerate()
        .filter(|(index, lexeme)| match lexeme.token {
            Token::Doc(_) => matches!(
                (lexemes.get(index + 1).map(|l| &l.token), lexemes.get(index + 2).map(|l| &l.token)),
                (Some(Token::Identifier(_)), Some(Token::LeftParen))
            ),
            _ => true,
        })
        .map(|(_, lexeme)| lexeme.clone())
        .collect();

    let parsed = match production {
        Production::Sequence => parse_sequence(&lexemes),
        Production::BooleanExpression => parse_boolean_expression(&lexemes),
        Production::NumericExpression => parse_additive(&lexemes),
    };

    match parsed {
        Ok(([], tree)) => Ok(tree),
        Ok((rest, _)) => {
            let failure = match production {
                Production::Sequence => match parse_statement(rest) {
                    Err(failure) => failure,
                    Ok(_) => Failure { remaining: rest.len(), expected: "a statement" },
                },
                _ => Failure { remaining: rest.len(), expected: "the end of input" },
            };
            Err(to_error(&lexemes, failure))
        }
        Err(failure) => Err(to_error(&lexemes, failure)),
    }
}
