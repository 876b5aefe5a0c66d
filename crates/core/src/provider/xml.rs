//! Strictly-typed views over the provider's XML payloads.
//!
//! The provider serializes "one or many" children the same way, so
//! all list handling happens here, once, at the boundary. Everything
//! downstream works with these raw structs.

use roxmltree::{Document, Node};

use crate::error::ProviderError;

/// One owned item from the collection listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCollectionItem {
    /// Provider object id.
    pub id: String,
    /// Display name from the listing.
    pub name: String,
    /// Declared subtype tag (e.g. `boardgame`, `boardgameexpansion`).
    pub subtype: String,
}

/// A single `<name>` element on a detail item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawName {
    /// `primary` or `alternate`.
    pub kind: String,
    /// The name text.
    pub value: String,
}

/// A single `<rank>` element from the statistics block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRank {
    /// Rank list kind: `subtype` or `family`.
    pub kind: String,
    /// Provider id of the rank list.
    pub id: String,
    /// Rank list name (e.g. `boardgame`, `strategygames`).
    pub name: String,
    /// Rank value; may be the literal `Not Ranked`.
    pub value: String,
}

/// One bucket of the suggested-player-count poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPollBucket {
    /// Player count label, e.g. `3` or `8+`.
    pub numplayers: String,
    /// Votes for "Best".
    pub best: u32,
    /// Votes for "Recommended".
    pub recommended: u32,
    /// Votes for "Not Recommended".
    pub not_recommended: u32,
}

/// One fully-detailed item from the details endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct RawGameItem {
    /// Provider object id.
    pub id: String,
    /// Declared item type (e.g. `boardgame`, `boardgameexpansion`).
    pub kind: String,
    /// All name variants, primary and alternate.
    pub names: Vec<RawName>,
    /// Publication year, as sent.
    pub year_published: String,
    /// Full-size image URL.
    pub image: String,
    /// Thumbnail URL.
    pub thumbnail: String,
    /// Description text.
    pub description: String,
    /// Minimum player count.
    pub min_players: u32,
    /// Maximum player count.
    pub max_players: u32,
    /// Playing time in minutes.
    pub playing_time: u32,
    /// Community average rating.
    pub rating: f64,
    /// Complexity weight.
    pub weight: f64,
    /// All rank list entries.
    pub ranks: Vec<RawRank>,
    /// Mechanism tags.
    pub mechanisms: Vec<String>,
    /// Category tags.
    pub categories: Vec<String>,
    /// Suggested-player-count poll buckets.
    pub poll: Vec<RawPollBucket>,
}

/// Parse a collection listing into raw items.
pub fn parse_collection(xml: &str) -> Result<Vec<RawCollectionItem>, ProviderError> {
    let document = parse_document(xml)?;
    let root = document.root_element();
    if !root.has_tag_name("items") {
        return Err(ProviderError::Parse(format!(
            "expected <items> root, found <{}>",
            root.tag_name().name()
        )));
    }

    let mut items = Vec::new();
    for node in root.children().filter(|n| n.has_tag_name("item")) {
        let Some(id) = node.attribute("objectid") else {
            continue;
        };
        let name = node
            .children()
            .find(|n| n.has_tag_name("name"))
            .and_then(|n| n.text())
            .unwrap_or("")
            .trim()
            .to_string();
        items.push(RawCollectionItem {
            id: id.to_string(),
            name,
            subtype: node.attribute("subtype").unwrap_or("boardgame").to_string(),
        });
    }
    Ok(items)
}

/// Parse a details payload into raw game items.
pub fn parse_details(xml: &str) -> Result<Vec<RawGameItem>, ProviderError> {
    let document = parse_document(xml)?;
    let root = document.root_element();
    if !root.has_tag_name("items") {
        return Err(ProviderError::Parse(format!(
            "expected <items> root, found <{}>",
            root.tag_name().name()
        )));
    }

    Ok(root
        .children()
        .filter(|n| n.has_tag_name("item"))
        .filter_map(parse_game_item)
        .collect())
}

fn parse_document(xml: &str) -> Result<Document<'_>, ProviderError> {
    if xml.trim().is_empty() {
        return Err(ProviderError::Parse("empty payload".to_string()));
    }
    Document::parse(xml).map_err(|err| ProviderError::Parse(err.to_string()))
}

fn parse_game_item(node: Node<'_, '_>) -> Option<RawGameItem> {
    let id = node.attribute("id")?.to_string();
    let kind = node.attribute("type").unwrap_or("boardgame").to_string();

    let names = node
        .children()
        .filter(|n| n.has_tag_name("name"))
        .filter_map(|n| {
            Some(RawName {
                kind: n.attribute("type").unwrap_or("primary").to_string(),
                value: n.attribute("value")?.to_string(),
            })
        })
        .collect();

    let mut mechanisms = Vec::new();
    let mut categories = Vec::new();
    for link in node.children().filter(|n| n.has_tag_name("link")) {
        let Some(value) = link.attribute("value") else {
            continue;
        };
        match link.attribute("type") {
            Some("boardgamemechanic") => mechanisms.push(value.to_string()),
            Some("boardgamecategory") => categories.push(value.to_string()),
            _ => {}
        }
    }

    let ratings = node
        .children()
        .find(|n| n.has_tag_name("statistics"))
        .and_then(|stats| stats.children().find(|n| n.has_tag_name("ratings")));
    let rating = ratings
        .and_then(|r| value_attr_of(r, "average"))
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(0.0);
    let weight = ratings
        .and_then(|r| value_attr_of(r, "averageweight"))
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(0.0);
    let ranks = ratings
        .and_then(|r| r.children().find(|n| n.has_tag_name("ranks")))
        .map(parse_ranks)
        .unwrap_or_default();

    let poll = node
        .children()
        .filter(|n| n.has_tag_name("poll"))
        .find(|n| n.attribute("name") == Some("suggested_numplayers"))
        .map(parse_poll)
        .unwrap_or_default();

    Some(RawGameItem {
        id,
        kind,
        names,
        year_published: value_attr_of(node, "yearpublished").unwrap_or_default(),
        image: child_text(node, "image"),
        thumbnail: child_text(node, "thumbnail"),
        description: child_text(node, "description"),
        min_players: parse_u32(value_attr_of(node, "minplayers"), 1),
        max_players: parse_u32(value_attr_of(node, "maxplayers"), 1),
        playing_time: parse_u32(value_attr_of(node, "playingtime"), 0),
        rating,
        weight,
        ranks,
        mechanisms,
        categories,
        poll,
    })
}

fn parse_ranks(ranks: Node<'_, '_>) -> Vec<RawRank> {
    ranks
        .children()
        .filter(|n| n.has_tag_name("rank"))
        .map(|n| RawRank {
            kind: n.attribute("type").unwrap_or_default().to_string(),
            id: n.attribute("id").unwrap_or_default().to_string(),
            name: n.attribute("name").unwrap_or_default().to_string(),
            value: n.attribute("value").unwrap_or_default().to_string(),
        })
        .collect()
}

fn parse_poll(poll: Node<'_, '_>) -> Vec<RawPollBucket> {
    poll.children()
        .filter(|n| n.has_tag_name("results"))
        .filter_map(|bucket| {
            let numplayers = bucket.attribute("numplayers")?.to_string();
            let mut best = 0;
            let mut recommended = 0;
            let mut not_recommended = 0;
            for result in bucket.children().filter(|n| n.has_tag_name("result")) {
                let votes = parse_u32(result.attribute("numvotes").map(str::to_string), 0);
                match result.attribute("value") {
                    Some("Best") => best = votes,
                    Some("Recommended") => recommended = votes,
                    Some("Not Recommended") => not_recommended = votes,
                    _ => {}
                }
            }
            Some(RawPollBucket {
                numplayers,
                best,
                recommended,
                not_recommended,
            })
        })
        .collect()
}

fn value_attr_of(parent: Node<'_, '_>, tag: &str) -> Option<String> {
    parent
        .children()
        .find(|n| n.has_tag_name(tag))
        .and_then(|n| n.attribute("value"))
        .map(str::to_string)
}

fn child_text(parent: Node<'_, '_>, tag: &str) -> String {
    parent
        .children()
        .find(|n| n.has_tag_name(tag))
        .and_then(|n| n.text())
        .unwrap_or("")
        .trim()
        .to_string()
}

fn parse_u32(value: Option<String>, default: u32) -> u32 {
    value
        .as_deref()
        .and_then(|v| v.trim().parse::<u32>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLLECTION_XML: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<items totalitems="3" termsofuse="https://boardgamegeek.com/xmlapi/termsofuse">
  <item objecttype="thing" objectid="224517" subtype="boardgame" collid="1">
    <name sortindex="1">Brass: Birmingham</name>
    <status own="1"/>
  </item>
  <item objecttype="thing" objectid="271320" subtype="boardgameexpansion" collid="2">
    <name sortindex="1">Wingspan: European Expansion</name>
    <status own="1"/>
  </item>
  <item objecttype="thing" objectid="237182" subtype="boardgame" collid="3">
    <name sortindex="1">Root</name>
    <status own="1"/>
  </item>
</items>"#;

    const DETAILS_XML: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<items termsofuse="https://boardgamegeek.com/xmlapi/termsofuse">
  <item type="boardgame" id="224517">
    <thumbnail>https://cf.example/thumb.jpg</thumbnail>
    <image>https://cf.example/image.jpg</image>
    <name type="primary" sortindex="1" value="Brass: Birmingham"/>
    <name type="alternate" sortindex="1" value="Brass. Birmingem"/>
    <description>Build networks.</description>
    <yearpublished value="2018"/>
    <minplayers value="2"/>
    <maxplayers value="4"/>
    <playingtime value="120"/>
    <poll name="suggested_numplayers" totalvotes="873">
      <results numplayers="2">
        <result value="Best" numvotes="155"/>
        <result value="Recommended" numvotes="470"/>
        <result value="Not Recommended" numvotes="55"/>
      </results>
      <results numplayers="4+">
        <result value="Best" numvotes="5"/>
        <result value="Recommended" numvotes="22"/>
        <result value="Not Recommended" numvotes="300"/>
      </results>
    </poll>
    <link type="boardgamecategory" id="1021" value="Economic"/>
    <link type="boardgamecategory" id="1088" value="Industry / Manufacturing"/>
    <link type="boardgamemechanic" id="2040" value="Hand Management"/>
    <link type="boardgamedesigner" id="20" value="Martin Wallace"/>
    <statistics page="1">
      <ratings>
        <average value="8.58"/>
        <averageweight value="3.91"/>
        <ranks>
          <rank type="subtype" id="1" name="boardgame" friendlyname="Board Game Rank" value="3" bayesaverage="8.41"/>
          <rank type="family" id="5497" name="strategygames" friendlyname="Strategy Game Rank" value="2" bayesaverage="8.45"/>
        </ranks>
      </ratings>
    </statistics>
  </item>
</items>"#;

    #[test]
    fn parses_collection_items_with_subtypes() {
        let items = parse_collection(COLLECTION_XML).expect("parse failed");
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].id, "224517");
        assert_eq!(items[0].name, "Brass: Birmingham");
        assert_eq!(items[1].subtype, "boardgameexpansion");
    }

    #[test]
    fn parses_detail_items_with_stats_links_and_poll() {
        let items = parse_details(DETAILS_XML).expect("parse failed");
        assert_eq!(items.len(), 1);
        let item = &items[0];

        assert_eq!(item.id, "224517");
        assert_eq!(item.kind, "boardgame");
        assert_eq!(item.names.len(), 2);
        assert_eq!(item.names[0].kind, "primary");
        assert_eq!(item.min_players, 2);
        assert_eq!(item.max_players, 4);
        assert_eq!(item.playing_time, 120);
        assert_eq!(item.rating, 8.58);
        assert_eq!(item.weight, 3.91);
        assert_eq!(item.mechanisms, vec!["Hand Management"]);
        assert_eq!(
            item.categories,
            vec!["Economic", "Industry / Manufacturing"]
        );
        assert_eq!(item.ranks.len(), 2);
        assert_eq!(item.ranks[0].name, "boardgame");
        assert_eq!(item.ranks[0].value, "3");
        assert_eq!(item.poll.len(), 2);
        assert_eq!(item.poll[1].numplayers, "4+");
        assert_eq!(item.poll[1].not_recommended, 300);
    }

    #[test]
    fn single_item_and_single_name_parse_the_same_way() {
        // The provider collapses one-element lists; the parser must
        // not care.
        let xml = r#"<items>
          <item type="boardgame" id="9">
            <name type="primary" value="Lone Game"/>
            <minplayers value="1"/>
            <maxplayers value="1"/>
          </item>
        </items>"#;
        let items = parse_details(xml).expect("parse failed");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].names.len(), 1);
        assert_eq!(items[0].names[0].value, "Lone Game");
        assert_eq!(items[0].rating, 0.0);
        assert!(items[0].ranks.is_empty());
    }

    #[test]
    fn rejects_empty_and_malformed_payloads() {
        assert!(matches!(
            parse_collection("   "),
            Err(ProviderError::Parse(_))
        ));
        assert!(matches!(
            parse_collection("<message>hi</message>"),
            Err(ProviderError::Parse(_))
        ));
        assert!(matches!(
            parse_details("<items><item id='1'"),
            Err(ProviderError::Parse(_))
        ));
    }
}
