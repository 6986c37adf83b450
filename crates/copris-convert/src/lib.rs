//! copris-convert — recodage, modeline et variables
//!
//! Trois étapes de la chaîne de conversion :
//! - [`recode_text`] : substitution codepoint par codepoint selon la
//!   table d'encodage, pour les imprimantes aux pages de codes anciennes
//! - [`parse_modeline`] / [`apply_modeline`] : la directive `COPRIS …`
//!   en première ligne, qui règle le comportement du flux
//! - [`parse_variables`] : les jetons `$NOM`, `$N`, `$$` et `$#`,
//!   remplacés par les commandes `C_*` de la table
//!
//! Aucune de ces étapes n'échoue : au pire elles avertissent et laissent
//! le texte passer tel quel.

#![deny(missing_docs)]

use log::{debug, info, warn};
use memchr::memchr;

use copris_core::{binary_tokens, codepoint_length, is_continuation};
use copris_features::{parse_number_string, CommandTable, MAX_ELEMENT_LENGTH};

/* ─────────────────────────── Recodage ─────────────────────────── */

/// Recode `text` codepoint par codepoint selon `encoding`.
///
/// Un codepoint présent dans la table est remplacé par sa définition
/// (possiblement vide : il disparaît) ; les autres sont copiés tels
/// quels. Retourne `true` si des codepoints multi-octets sans définition
/// ont survécu — l'appelant peut alors prévenir que la sortie contient
/// du multi-octets brut.
pub fn recode_text(text: &mut Vec<u8>, encoding: &CommandTable) -> bool {
    let source = std::mem::take(text);
    let mut recoded = Vec::with_capacity(source.len());
    let mut raw_multibyte = false;

    let mut i = 0;
    while i < source.len() {
        let width = if is_continuation(source[i]) { 1 } else { codepoint_length(source[i]) };
        let end = (i + width).min(source.len());
        let input = &source[i..end];

        let definition = std::str::from_utf8(input).ok().and_then(|c| encoding.get(c));
        match definition {
            Some(replacement) => recoded.extend_from_slice(replacement),
            None => {
                recoded.extend_from_slice(input);
                if input.len() > 1 {
                    raw_multibyte = true;
                }
            }
        }

        i = end;
    }

    *text = recoded;
    raw_multibyte
}

/* ─────────────────────────── Modeline ─────────────────────────── */

/// Résultat de l'examen de la première ligne.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modeline {
    /// Pas de mot `COPRIS` en tête : texte ordinaire.
    Absent,
    /// `COPRIS` seul, sans directive.
    Empty,
    /// Des directives, mais aucune reconnue.
    Unknown,
    /// Directives reconnues.
    Directives {
        /// `ENABLE-COMMAND(S)`/`ENABLE-CMD(S)` — active la substitution
        /// de variables. `ENABLE-VARIABLE(S)`/`ENABLE-VAR(S)` est accepté
        /// comme alias de compatibilité.
        enable_commands: bool,
        /// `DISABLE-MARKDOWN`/`DISABLE-MD` — saute l'étape Markdown.
        disable_markdown: bool,
    },
}

/// Recherche de sous-chaîne ASCII insensible à la casse.
fn contains_ignore_case(haystack: &[u8], needle: &str) -> bool {
    let needle = needle.as_bytes();
    haystack.windows(needle.len()).any(|w| w.eq_ignore_ascii_case(needle))
}

/// Examine la première ligne de `text` à la recherche d'une modeline
/// `COPRIS <directive>…`.
///
/// Les directives sont insensibles à la casse et à l'ordre.
#[must_use]
pub fn parse_modeline(text: &[u8]) -> Modeline {
    if text.len() < 6 || !text[..6].eq_ignore_ascii_case(b"COPRIS") {
        return Modeline::Absent;
    }

    if text.len() == 6 || text[6] == b'\n' {
        return Modeline::Empty;
    }

    // La directive s'arrête à la fin de la première ligne
    let rest = &text[6..];
    let line = memchr(b'\n', rest).map_or(rest, |pos| &rest[..pos]);

    let enable_commands = contains_ignore_case(line, "ENABLE-COMMAND")
        || contains_ignore_case(line, "ENABLE-CMD")
        || contains_ignore_case(line, "ENABLE-VAR");

    let disable_markdown = contains_ignore_case(line, "DISABLE-MD");

    if !enable_commands && !disable_markdown {
        return Modeline::Unknown;
    }

    Modeline::Directives { enable_commands, disable_markdown }
}

/// Retire la modeline de `text`, en fonction du résultat de
/// [`parse_modeline`].
///
/// Une modeline vide ou inconnue est signalée puis retirée quand même :
/// la première ligne appartenait à COPRIS, pas au texte.
pub fn apply_modeline(text: &mut Vec<u8>, modeline: Modeline) {
    match modeline {
        Modeline::Absent => {
            info!("Pas de modeline 'COPRIS <directive>', aucune variable ne sera traitée.");
            return;
        }
        Modeline::Empty => warn!("La modeline est vide, elle sera ignorée."),
        Modeline::Unknown => warn!("La modeline n'a que des directives inconnues, elle sera ignorée."),
        Modeline::Directives { .. } => debug!("Modeline valide trouvée."),
    }

    match memchr(b'\n', text) {
        Some(pos) => {
            text.drain(..=pos);
        }
        None => {
            // Pas de saut de ligne : rien après la modeline
            text.clear();
            info!("Aucune donnée après la modeline.");
        }
    }
}

/* ─────────────────────────── Variables ─────────────────────────── */

/// Ponctuation susceptible de suivre un nom de variable ; elle est
/// détachée avant la résolution puis réinsérée après l'expansion.
/// `$` et `;` n'y figurent pas : ce sont des terminateurs, consommés.
const PUNCTUATION: &[u8] = b"!\"#%&'()*+,./:<=>?@[\\]^`{|}~";

/// Remplace les jetons `$…` de `text` par leur expansion.
///
/// Le texte est découpé par lignes puis par espaces simples ; seul un
/// jeton commençant par `$` est une variable :
/// - `$#…` — commentaire, écarté avec son séparateur
/// - `$$…` — `$` littéral
/// - `$<chiffres>` — octet littéral (base 8, 10 ou 16)
/// - `$NOM` — valeur de la commande `C_NOM` ; inconnue, le jeton reste
///   tel quel et un avertissement part dans le journal
///
/// Un `$` ou un `;` collé au nom en marque la fin et disparaît ; toute
/// autre ponctuation finale est réinsérée derrière l'expansion.
pub fn parse_variables(text: &mut Vec<u8>, features: &CommandTable) {
    let source = std::mem::take(text);
    let mut output = Vec::with_capacity(source.len());

    for line_token in binary_tokens(&source, b'\n') {
        for token in binary_tokens(line_token.data, b' ') {
            if token.data.first() != Some(&b'$') {
                output.extend_from_slice(token.data);
                continue;
            }

            // Détacher l'éventuel séparateur final (espace ou saut de
            // ligne) du corps de la variable
            let (body, separator) = match token.data.split_last() {
                Some((&last, init)) if last == b' ' || last == b'\n' => (init, Some(last)),
                _ => (token.data, None),
            };

            // Commentaire : le jeton et son séparateur disparaissent
            if body.get(1) == Some(&b'#') {
                continue;
            }

            expand_variable(&mut output, features, body);

            if let Some(sep) = separator {
                output.push(sep);
            }
        }
    }

    *text = output;
}

/// Développe un corps de variable (`$…`, séparateur déjà détaché) dans
/// `output`.
fn expand_variable(output: &mut Vec<u8>, features: &CommandTable, body: &[u8]) {
    let name = &body[1..];

    // `$$` : dollar littéral
    if name.first() == Some(&b'$') {
        output.extend_from_slice(name);
        return;
    }

    // Fin de nom : `$` et `;` sont consommés, la ponctuation est gardée
    let mut name_end = name.len();
    let mut suffix: &[u8] = &[];
    for (i, &byte) in name.iter().enumerate() {
        if byte == b'$' || byte == b';' {
            name_end = i;
            suffix = &name[i + 1..];
            break;
        }
        if PUNCTUATION.contains(&byte) {
            name_end = i;
            suffix = &name[i..];
            break;
        }
    }
    let name = &name[..name_end];

    // Octet littéral
    if name.first().is_some_and(u8::is_ascii_digit) {
        let number = std::str::from_utf8(name)
            .ok()
            .and_then(|s| parse_number_string(s, 1).ok())
            .filter(|bytes| !bytes.is_empty());

        match number {
            Some(bytes) => output.extend_from_slice(&bytes),
            None => warn!("La variable '{}' a été sautée.", String::from_utf8_lossy(body)),
        }
        output.extend_from_slice(suffix);
        return;
    }

    // Commande : préparer le nom C_… pour la recherche
    let lookup = match std::str::from_utf8(name) {
        Ok(name) if 2 + name.len() <= MAX_ELEMENT_LENGTH => format!("C_{name}"),
        _ => {
            warn!(
                "Notation de commande trouvée, mais impossible à résoudre : '{}'.",
                String::from_utf8_lossy(body)
            );
            output.extend_from_slice(body);
            return;
        }
    };

    match features.get(&lookup) {
        Some(value) => {
            info!("Variable '{}' trouvée.", String::from_utf8_lossy(body));
            output.extend_from_slice(value);
            output.extend_from_slice(suffix);
        }
        None => {
            warn!(
                "Variable '{}' trouvée, mais la commande n'est pas définie.",
                String::from_utf8_lossy(body)
            );
            output.extend_from_slice(body);
        }
    }
}

/* ─────────────────────────── Tests ─────────────────────────── */

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn encoding_table() -> CommandTable {
        let mut table = CommandTable::new();
        table.set("č", b"c".to_vec()).unwrap();
        table.set("ž", b"z".to_vec()).unwrap();
        table.set("š", b"s".to_vec()).unwrap();
        table
    }

    #[test]
    fn recode_substitutes_mapped_codepoints() {
        let mut text = "čAžBšC".as_bytes().to_vec();
        let raw = recode_text(&mut text, &encoding_table());

        assert_eq!(text, b"cAzBsC");
        assert!(!raw);
    }

    #[test]
    fn recode_empty_table_is_identity() {
        let mut text = b"identique, ASCII pur.\n".to_vec();
        let raw = recode_text(&mut text, &CommandTable::new());

        assert_eq!(text, b"identique, ASCII pur.\n");
        assert!(!raw);
    }

    #[test]
    fn recode_flags_surviving_multibyte() {
        let mut text = "prix : 3 €".as_bytes().to_vec();
        let raw = recode_text(&mut text, &encoding_table());

        assert_eq!(text, "prix : 3 €".as_bytes());
        assert!(raw);
    }

    #[test]
    fn recode_empty_definition_deletes() {
        let mut table = CommandTable::new();
        table.set("œ", Vec::new()).unwrap();

        let mut text = "cœur".as_bytes().to_vec();
        recode_text(&mut text, &table);
        assert_eq!(text, b"cur");
    }

    #[test]
    fn modeline_absent() {
        assert_eq!(parse_modeline(b"du texte normal\n"), Modeline::Absent);
        assert_eq!(parse_modeline(b"COPR"), Modeline::Absent);
    }

    #[test]
    fn modeline_empty() {
        assert_eq!(parse_modeline(b"COPRIS\nsuite"), Modeline::Empty);
        assert_eq!(parse_modeline(b"copris"), Modeline::Empty);
    }

    #[test]
    fn modeline_unknown() {
        assert_eq!(parse_modeline(b"COPRIS FAIS-DU-CAFE\n"), Modeline::Unknown);
    }

    #[test]
    fn modeline_directives_case_and_order_insensitive() {
        let expected = Modeline::Directives { enable_commands: true, disable_markdown: true };

        assert_eq!(parse_modeline(b"COPRIS ENABLE-COMMANDS DISABLE-MARKDOWN\n"), expected);
        assert_eq!(parse_modeline(b"copris disable-md enable-cmds\n"), expected);
        assert_eq!(
            parse_modeline(b"Copris Enable-Variables\n"),
            Modeline::Directives { enable_commands: true, disable_markdown: false }
        );
    }

    #[test]
    fn modeline_only_reads_first_line() {
        assert_eq!(parse_modeline(b"COPRIS RIEN\nENABLE-COMMANDS\n"), Modeline::Unknown);
    }

    #[test]
    fn modeline_stripping() {
        let mut text = b"COPRIS ENABLE-CMD\ncorps\n".to_vec();
        let modeline = parse_modeline(&text);
        apply_modeline(&mut text, modeline);
        assert_eq!(text, b"corps\n");

        let mut text = b"texte sans modeline\n".to_vec();
        apply_modeline(&mut text, Modeline::Absent);
        assert_eq!(text, b"texte sans modeline\n");

        let mut text = b"COPRIS ENABLE-CMD".to_vec();
        let modeline = parse_modeline(&text);
        apply_modeline(&mut text, modeline);
        assert!(text.is_empty());
    }

    fn features_table() -> CommandTable {
        let mut table = CommandTable::with_predefined();
        table.set("C_BOLD", vec![0x1B, 0x45]).unwrap();
        table.set("C_BELL", vec![0x07]).unwrap();
        table
    }

    fn substitute(input: &[u8]) -> Vec<u8> {
        let mut text = input.to_vec();
        parse_variables(&mut text, &features_table());
        text
    }

    #[test]
    fn variable_expands_with_following_text() {
        assert_eq!(substitute(b"$BOLD world\n"), b"\x1B\x45 world\n".to_vec());
    }

    #[test]
    fn variable_at_end_of_line() {
        assert_eq!(substitute(b"ding $BELL\n"), b"ding \x07\n".to_vec());
    }

    #[test]
    fn undefined_variable_stays_verbatim() {
        assert_eq!(substitute(b"salut $INCONNU !\n"), b"salut $INCONNU !\n".to_vec());
    }

    #[test]
    fn numeric_variables() {
        assert_eq!(substitute(b"$65 $0x42 $0103\n"), b"A B C\n".to_vec());
    }

    #[test]
    fn escaped_dollar() {
        assert_eq!(substitute(b"$$19,99\n"), b"$19,99\n".to_vec());
    }

    #[test]
    fn comment_discarded_with_separator() {
        assert_eq!(substitute(b"avant $#note apres\n"), b"avant apres\n".to_vec());
    }

    #[test]
    fn punctuation_suffix_is_reappended() {
        assert_eq!(substitute(b"fin $BELL!\n"), b"fin \x07!\n".to_vec());
        assert_eq!(substitute(b"fin $BELL...\n"), b"fin \x07...\n".to_vec());
    }

    #[test]
    fn dollar_and_semicolon_terminate_names() {
        assert_eq!(substitute(b"$BELL$suite\n"), b"\x07suite\n".to_vec());
        assert_eq!(substitute(b"$BELL;suite\n"), b"\x07suite\n".to_vec());
    }

    #[test]
    fn plain_text_untouched() {
        assert_eq!(substitute(b"aucun dollar ici\nni la\n"), b"aucun dollar ici\nni la\n".to_vec());
    }
}
