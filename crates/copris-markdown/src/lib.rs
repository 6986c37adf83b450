//! copris-markdown — un reconnaisseur Markdown volontairement naïf
//!
//! Seuls quelques attributs de texte sont reconnus et traduits en
//! commandes d'imprimante :
//! - emphase (gras, italique, les deux)
//! - titres `#` à `####`
//! - citations `> `
//! - code en ligne et blocs de code (clôturés ou indentés)
//!
//! Tout le reste passe tel quel — espaces, listes, filets, sauts de
//! ligne, paragraphes. En bout de chaîne il n'y a ni HTML ni moteur de
//! rendu : du texte à pas fixe se met très bien en page tout seul, et
//! l'imprimante ne montre aucun aperçu. Un parseur sémantique complet
//! restructurerait le texte contre le gré de l'utilisateur ; celui-ci se
//! contente d'allumer et d'éteindre des attributs.
//!
//! La syntaxe s'inspire de CommonMark, sans aucune garantie de
//! conformité.

#![deny(missing_docs)]

use log::{debug, warn};

use copris_features::CommandTable;

/// Attribut reconnu sur l'itération courante.
///
/// Les astérisques sont ambigus : début ou fin d'emphase, élément de
/// liste, filet horizontal. Les deux derniers ne doivent surtout pas
/// basculer le gras ou l'italique.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    BoldItalic,
    Bold,
    Italic,
    Heading(u8),
    Blockquote,
    InlineCode,
    CodeBlock,
    Rule,
}

/// État ouvert/fermé des attributs à bascule.
#[derive(Debug, Default)]
struct Toggles {
    bold: bool,
    italic: bool,
    inline_code: bool,
    code_block: bool,
}

/// Réécrit le balisage de `text` en commandes d'imprimante prises dans
/// `table`.
///
/// Ne produit jamais d'erreur : une commande vide ou absente s'émet
/// comme rien, un attribut resté ouvert en fin de texte est refermé avec
/// un avertissement nommant la ligne probable (sauf la bascule `***`,
/// trop ambiguë pour être datée).
pub fn parse_markdown(text: &mut Vec<u8>, table: &CommandTable) {
    let source = std::mem::take(text);
    let len = source.len();
    let mut converted = Vec::with_capacity(len);

    let mut toggles = Toggles::default();
    let mut heading_level: u8 = 0;
    let mut blockquote_open = false;
    let mut code_line_open = false; // bloc de code indenté, jusqu'au \n

    let mut last_char = b' ';
    let mut current_line = 1;
    let mut error_in_line = 0;

    let emit = |converted: &mut Vec<u8>, name: &str| {
        match table.get(name) {
            Some(value) => converted.extend_from_slice(value),
            None => debug!("Commande {name} absente de la table, rien à émettre."),
        }
    };

    let mut i = 0;
    while i < len {
        let at_line_start = i == 0 || last_char == b'\n';
        let byte = source[i];
        let mut pending = None;

        // Filets horizontaux « *** » seuls sur leur ligne : copiés tels quels.
        if at_line_start
            && byte == b'*'
            && i + 3 < len
            && source[i + 1] == b'*'
            && source[i + 2] == b'*'
            && source[i + 3] == b'\n'
        {
            pending = Some(Pending::Rule);
            i += 3;

        // Emphase : paires de `*`/`_` en ligne pour l'italique, doublées
        // pour le gras, triplées pour les deux.
        } else if (byte == b'*' || byte == b'_') && i + 1 < len && source[i + 1] != b' ' {
            let marker = |b: u8| b == b'*' || b == b'_';

            if marker(source[i + 1]) {
                if i + 2 < len && marker(source[i + 2]) {
                    pending = Some(Pending::BoldItalic);
                    toggles.bold = !toggles.bold;
                    toggles.italic = !toggles.italic;
                    i += 2;
                } else {
                    pending = Some(Pending::Bold);
                    toggles.bold = !toggles.bold;
                    i += 1;
                }
            } else {
                pending = Some(Pending::Italic);
                toggles.italic = !toggles.italic;
            }

        // Titres : `#` à `####` en début de ligne, suivis d'une espace.
        // Les espaces surnuméraires sont préservées (pour centrer un
        // titre, par exemple).
        } else if at_line_start && byte == b'#' {
            let run = source[i..].iter().take(4).take_while(|&&b| b == b'#').count();
            if source.get(i + run) == Some(&b' ') {
                let level = run as u8;
                pending = Some(Pending::Heading(level));
                heading_level = level;
                i += run; // la dernière position consommée est l'espace
            }

        // Citation : `> ` en début de ligne.
        } else if at_line_start && byte == b'>' && source.get(i + 1) == Some(&b' ') {
            pending = Some(Pending::Blockquote);
            blockquote_open = true;
            i += 1;

        // Code : « ` » seul en ligne, « ``` » en clôture de bloc, ou
        // quatre espaces en tête de ligne.
        } else if byte == b'`' && !code_line_open {
            if i + 2 < len && source[i + 1] == b'`' && source[i + 2] == b'`' {
                pending = Some(Pending::CodeBlock);
                toggles.code_block = !toggles.code_block;
                i += 2;
            } else if !toggles.code_block {
                pending = Some(Pending::InlineCode);
                toggles.inline_code = !toggles.inline_code;
            }
        } else if at_line_start
            && !toggles.code_block
            && i + 3 < len
            && source[i..i + 4] == *b"    "
        {
            pending = Some(Pending::CodeBlock);
            code_line_open = true;
            i += 3;
        }

        match pending {
            None => {
                // Refermer les attributs de ligne sur un saut de ligne
                if byte == b'\n' {
                    if heading_level > 0 {
                        emit(&mut converted, &format!("F_H{heading_level}_OFF"));
                        heading_level = 0;
                    } else if blockquote_open {
                        emit(&mut converted, "F_BLOCKQUOTE_OFF");
                        blockquote_open = false;
                    } else if code_line_open {
                        emit(&mut converted, "F_CODE_BLOCK_OFF");
                        code_line_open = false;
                    }
                }

                converted.push(byte);
            }

            // Le gras enveloppe toujours l'italique quand les deux
            // changent ensemble.
            Some(Pending::BoldItalic) => {
                if toggles.bold {
                    emit(&mut converted, "F_BOLD_ON");
                }
                emit(&mut converted, if toggles.italic { "F_ITALIC_ON" } else { "F_ITALIC_OFF" });
                if !toggles.bold {
                    emit(&mut converted, "F_BOLD_OFF");
                }
            }

            Some(Pending::Italic) => {
                emit(&mut converted, if toggles.italic { "F_ITALIC_ON" } else { "F_ITALIC_OFF" });
                if toggles.italic {
                    error_in_line = current_line;
                }
            }

            Some(Pending::Bold) => {
                emit(&mut converted, if toggles.bold { "F_BOLD_ON" } else { "F_BOLD_OFF" });
                if toggles.bold {
                    error_in_line = current_line;
                }
            }

            Some(Pending::Heading(level)) => {
                emit(&mut converted, &format!("F_H{level}_ON"));
            }

            Some(Pending::Blockquote) => {
                emit(&mut converted, "F_BLOCKQUOTE_ON");
            }

            Some(Pending::InlineCode) => {
                emit(
                    &mut converted,
                    if toggles.inline_code { "F_INLINE_CODE_ON" } else { "F_INLINE_CODE_OFF" },
                );
                if toggles.inline_code {
                    error_in_line = current_line;
                }
            }

            Some(Pending::CodeBlock) => {
                emit(
                    &mut converted,
                    if toggles.code_block || code_line_open {
                        "F_CODE_BLOCK_ON"
                    } else {
                        "F_CODE_BLOCK_OFF"
                    },
                );
                if toggles.code_block {
                    error_in_line = current_line;
                }
            }

            Some(Pending::Rule) => {
                converted.extend_from_slice(b"***\n");
            }
        }

        last_char = source[i];
        if last_char == b'\n' {
            current_line += 1;
        }
        i += 1;
    }

    // Refermer les attributs restés ouverts
    if toggles.code_block {
        emit(&mut converted, "F_CODE_BLOCK_OFF");
    }
    if toggles.inline_code {
        emit(&mut converted, "F_INLINE_CODE_OFF");
    }
    if toggles.bold {
        emit(&mut converted, "F_BOLD_OFF");
    }
    if toggles.italic {
        emit(&mut converted, "F_ITALIC_OFF");
    }

    // Ne signaler que la première occurrence — l'ordre compte
    if toggles.code_block {
        warn!("Bloc de code encore ouvert en fin de texte, sans doute ligne {error_in_line}.");
    } else if error_in_line > 0 && toggles.inline_code {
        warn!("Code en ligne encore ouvert en fin de texte, sans doute ligne {error_in_line}.");
    } else if error_in_line > 0 && toggles.bold {
        warn!("Gras encore ouvert en fin de texte, sans doute ligne {error_in_line}.");
    } else if error_in_line > 0 && toggles.italic {
        warn!("Italique encore ouvert en fin de texte, sans doute ligne {error_in_line}.");
    }

    *text = converted;
}

/* ─────────────────────────── Tests ─────────────────────────── */

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    /// Table d'essai aux valeurs courtes et reconnaissables.
    fn test_table() -> CommandTable {
        let mut table = CommandTable::with_predefined();
        table.set("F_BOLD_ON", b"<B>".to_vec()).unwrap();
        table.set("F_BOLD_OFF", b"</B>".to_vec()).unwrap();
        table.set("F_ITALIC_ON", b"<I>".to_vec()).unwrap();
        table.set("F_ITALIC_OFF", b"</I>".to_vec()).unwrap();
        table.set("F_H1_ON", vec![0x1B, 0x21, 0x30]).unwrap();
        table.set("F_H1_OFF", vec![0x1B, 0x21, 0x00]).unwrap();
        table.set("F_H2_ON", b"<H2>".to_vec()).unwrap();
        table.set("F_H2_OFF", b"</H2>".to_vec()).unwrap();
        table.set("F_BLOCKQUOTE_ON", b"<Q>".to_vec()).unwrap();
        table.set("F_BLOCKQUOTE_OFF", b"</Q>".to_vec()).unwrap();
        table.set("F_INLINE_CODE_ON", b"<C>".to_vec()).unwrap();
        table.set("F_INLINE_CODE_OFF", b"</C>".to_vec()).unwrap();
        table.set("F_CODE_BLOCK_ON", b"<CB>".to_vec()).unwrap();
        table.set("F_CODE_BLOCK_OFF", b"</CB>".to_vec()).unwrap();
        table
    }

    fn convert(input: &str) -> Vec<u8> {
        let mut text = input.as_bytes().to_vec();
        parse_markdown(&mut text, &test_table());
        text
    }

    #[test]
    fn plain_text_is_untouched() {
        assert_eq!(convert("rien à signaler\n"), "rien à signaler\n".as_bytes().to_vec());
    }

    #[test]
    fn heading_commands_wrap_the_line() {
        assert_eq!(
            convert("# Hello\n"),
            [&[0x1B, 0x21, 0x30][..], b"Hello", &[0x1B, 0x21, 0x00], b"\n"].concat()
        );
    }

    #[test]
    fn heading_extra_spaces_preserved() {
        assert_eq!(convert("##   Centré\n"), b"<H2>  Centr\xC3\xA9</H2>\n".to_vec());
    }

    #[test]
    fn pound_without_space_is_plain_text() {
        assert_eq!(convert("#Hello\n"), b"#Hello\n".to_vec());
    }

    #[test]
    fn bold_pair() {
        assert_eq!(convert("du **gras** ici\n"), b"du <B>gras</B> ici\n".to_vec());
    }

    #[test]
    fn italic_with_underscores() {
        assert_eq!(convert("_penché_\n"), b"<I>pench\xC3\xA9</I>\n".to_vec());
    }

    #[test]
    fn triple_markers_nest_bold_around_italic() {
        assert_eq!(convert("***tout***\n"), b"<B><I>tout</I></B>\n".to_vec());
    }

    #[test]
    fn horizontal_rule_passes_verbatim() {
        assert_eq!(convert("avant\n***\naprès\n"), "avant\n***\naprès\n".as_bytes().to_vec());
    }

    #[test]
    fn marker_before_space_is_plain() {
        // « * » suivi d'une espace : élément de liste, pas d'emphase
        assert_eq!(convert("* item\n"), b"* item\n".to_vec());
    }

    #[test]
    fn blockquote_wraps_line() {
        assert_eq!(convert("> citation\n"), b"<Q>citation</Q>\n".to_vec());
    }

    #[test]
    fn fenced_code_block_toggles() {
        assert_eq!(convert("```\nlet x;\n```\n"), b"<CB>\nlet x;\n</CB>\n".to_vec());
    }

    #[test]
    fn indented_code_line() {
        assert_eq!(convert("    let x;\n"), b"<CB>let x;</CB>\n".to_vec());
    }

    #[test]
    fn inline_code_toggles() {
        assert_eq!(convert("tape `ls` ici\n"), b"tape <C>ls</C> ici\n".to_vec());
    }

    #[test]
    fn single_backtick_inside_fenced_block_is_plain() {
        assert_eq!(convert("```\nun ` seul\n```\n"), b"<CB>\nun ` seul\n</CB>\n".to_vec());
    }

    #[test]
    fn unclosed_bold_is_closed_at_eof() {
        assert_eq!(convert("**oubli"), b"<B>oubli</B>".to_vec());
    }

    #[test]
    fn whole_document() {
        let input = "# Recette\n\
                     Pour **deux** personnes.\n\
                     > un avis\n\
                     ***\n\
                     tape `make`\n";
        let expected: Vec<u8> = [
            &[0x1B, 0x21, 0x30][..],
            b"Recette",
            &[0x1B, 0x21, 0x00],
            b"\nPour <B>deux</B> personnes.\n<Q>un avis</Q>\n***\ntape <C>make</C>\n",
        ]
        .concat();

        assert_eq!(convert(input), expected);
    }

    #[test]
    fn empty_commands_emit_nothing() {
        let mut text = b"# Titre\n**gras**\n".to_vec();
        parse_markdown(&mut text, &CommandTable::with_predefined());
        assert_eq!(text, b"Titre\ngras\n".to_vec());
    }
}
