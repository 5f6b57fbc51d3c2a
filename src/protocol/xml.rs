//! XML payload codec for job descriptors and bulk requests

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::types::{
    BulkObject, Chunk, ChunkOrdering, Ds3Object, JobStatus, MasterObjectList, Node, Priority,
    RequestType, WriteOptimization,
};
use crate::error::Result;

#[derive(Debug, Deserialize)]
struct MasterObjectListXml {
    #[serde(rename = "@JobId")]
    job_id: Uuid,
    #[serde(rename = "@BucketName")]
    bucket_name: String,
    #[serde(rename = "@RequestType")]
    request_type: RequestType,
    #[serde(rename = "@Priority", default)]
    priority: Option<Priority>,
    #[serde(rename = "@WriteOptimization", default)]
    write_optimization: Option<WriteOptimization>,
    #[serde(rename = "@ChunkClientProcessingOrderGuarantee", default)]
    chunk_ordering: Option<ChunkOrdering>,
    #[serde(rename = "@StartDate", default)]
    start_date: Option<String>,
    #[serde(rename = "@Status", default)]
    status: Option<JobStatus>,
    #[serde(rename = "@OriginalSizeInBytes", default)]
    original_size_in_bytes: Option<u64>,
    #[serde(rename = "@CachedSizeInBytes", default)]
    cached_size_in_bytes: Option<u64>,
    #[serde(rename = "@CompletedSizeInBytes", default)]
    completed_size_in_bytes: Option<u64>,
    #[serde(rename = "@UserName", default)]
    user_name: Option<String>,
    #[serde(rename = "Nodes", default)]
    nodes: NodesXml,
    #[serde(rename = "Objects", default)]
    chunks: Vec<ChunkXml>,
}

#[derive(Debug, Default, Deserialize)]
struct NodesXml {
    #[serde(rename = "Node", default)]
    nodes: Vec<NodeXml>,
}

#[derive(Debug, Deserialize)]
struct NodeXml {
    #[serde(rename = "@EndPoint")]
    endpoint: String,
    #[serde(rename = "@HttpPort", default)]
    http_port: Option<u16>,
    #[serde(rename = "@HttpsPort", default)]
    https_port: Option<u16>,
    #[serde(rename = "@Id")]
    id: Uuid,
}

#[derive(Debug, Deserialize)]
struct ChunkXml {
    #[serde(rename = "@ChunkId")]
    chunk_id: Uuid,
    #[serde(rename = "@ChunkNumber", default)]
    chunk_number: u32,
    #[serde(rename = "@NodeId", default)]
    node_id: Option<Uuid>,
    #[serde(rename = "Object", default)]
    objects: Vec<BulkObjectXml>,
}

#[derive(Debug, Deserialize)]
struct BulkObjectXml {
    #[serde(rename = "@Name")]
    name: String,
    #[serde(rename = "@Length", default)]
    length: u64,
    #[serde(rename = "@Offset", default)]
    offset: u64,
    #[serde(rename = "@InCache", default)]
    in_cache: bool,
}

#[derive(Debug, Default, Deserialize)]
struct JobsXml {
    #[serde(rename = "Job", default)]
    jobs: Vec<MasterObjectListXml>,
}

#[derive(Debug, Serialize)]
#[serde(rename = "Objects")]
struct ObjectsRequestXml {
    #[serde(rename = "Object")]
    objects: Vec<ObjectRequestXml>,
}

#[derive(Debug, Serialize)]
struct ObjectRequestXml {
    #[serde(rename = "@Name")]
    name: String,
    #[serde(rename = "@Size", skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
}

impl From<NodeXml> for Node {
    fn from(node: NodeXml) -> Self {
        Node {
            endpoint: node.endpoint,
            http_port: node.http_port,
            https_port: node.https_port,
            id: node.id,
        }
    }
}

impl From<BulkObjectXml> for BulkObject {
    fn from(object: BulkObjectXml) -> Self {
        BulkObject {
            name: object.name,
            length: object.length,
            offset: object.offset,
            in_cache: object.in_cache,
        }
    }
}

impl From<ChunkXml> for Chunk {
    fn from(chunk: ChunkXml) -> Self {
        Chunk {
            chunk_id: chunk.chunk_id,
            chunk_number: chunk.chunk_number,
            node_id: chunk.node_id,
            objects: chunk.objects.into_iter().map(BulkObject::from).collect(),
        }
    }
}

impl From<MasterObjectListXml> for MasterObjectList {
    fn from(list: MasterObjectListXml) -> Self {
        MasterObjectList {
            job_id: list.job_id,
            bucket_name: list.bucket_name,
            request_type: list.request_type,
            priority: list.priority,
            write_optimization: list.write_optimization,
            chunk_ordering: list.chunk_ordering,
            start_date: list.start_date,
            status: list.status,
            original_size_in_bytes: list.original_size_in_bytes,
            cached_size_in_bytes: list.cached_size_in_bytes,
            completed_size_in_bytes: list.completed_size_in_bytes,
            user_name: list.user_name,
            nodes: list.nodes.nodes.into_iter().map(Node::from).collect(),
            chunks: list.chunks.into_iter().map(Chunk::from).collect(),
        }
    }
}

/// Decode a `<MasterObjectList>` document
pub fn parse_master_object_list(xml: &str) -> Result<MasterObjectList> {
    let list: MasterObjectListXml = quick_xml::de::from_str(xml)?;
    Ok(list.into())
}

/// Decode a single `<Objects>` chunk document
pub fn parse_chunk(xml: &str) -> Result<Chunk> {
    let chunk: ChunkXml = quick_xml::de::from_str(xml)?;
    Ok(chunk.into())
}

/// Decode a `<Jobs>` listing; the jobs carry no chunks
pub fn parse_jobs(xml: &str) -> Result<Vec<MasterObjectList>> {
    let jobs: JobsXml = quick_xml::de::from_str(xml)?;
    Ok(jobs.jobs.into_iter().map(MasterObjectList::from).collect())
}

/// Encode the object list of a bulk put or get request
///
/// Sizes are only sent for puts.
pub fn bulk_request_body(objects: &[Ds3Object], with_sizes: bool) -> Result<String> {
    let body = ObjectsRequestXml {
        objects: objects
            .iter()
            .map(|o| ObjectRequestXml {
                name: o.name.clone(),
                size: if with_sizes { o.size } else { None },
            })
            .collect(),
    };
    Ok(quick_xml::se::to_string(&body)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASTER_OBJECT_LIST_XML: &str = r#"<MasterObjectList BucketName="bucket8192000000" JobId="1a85e743-ec8f-4789-afec-97e587a26936" Priority="NORMAL" RequestType="GET" StartDate="2014-07-01T20:12:52.000Z">
  <Nodes>
    <Node EndPoint="10.1.18.12" HttpPort="80" HttpsPort="443" Id="a02053b9-0147-11e4-8d6a-002590c1177c"/>
    <Node EndPoint="10.1.18.13" HttpsPort="443" Id="95e97010-8e70-4733-926c-aeeb21796848"/>
  </Nodes>
  <Objects ChunkId="f58370c2-2538-4e78-a9f8-e4d2676bdf44" ChunkNumber="0" NodeId="a02053b9-0147-11e4-8d6a-002590c1177c">
    <Object Name="client00obj000004-8000000" InCache="true" Length="5368709120" Offset="0"/>
    <Object Name="client00obj000004-8000000" InCache="true" Length="2823290880" Offset="5368709120"/>
  </Objects>
  <Objects ChunkId="4137d768-25bb-4942-9d36-b92dfbe75e01" ChunkNumber="1" NodeId="95e97010-8e70-4733-926c-aeeb21796848">
    <Object Name="client00obj000008-8000000" InCache="false" Length="2823290880" Offset="5368709120"/>
    <Object Name="client00obj000008-8000000" InCache="true" Length="5368709120" Offset="0"/>
  </Objects>
</MasterObjectList>"#;

    #[test]
    fn test_parse_master_object_list() {
        let list = parse_master_object_list(MASTER_OBJECT_LIST_XML).unwrap();
        assert_eq!(list.bucket_name, "bucket8192000000");
        assert_eq!(
            list.job_id,
            Uuid::parse_str("1a85e743-ec8f-4789-afec-97e587a26936").unwrap()
        );
        assert_eq!(list.priority, Some(Priority::Normal));
        assert_eq!(list.request_type, RequestType::Get);
        assert_eq!(list.start_date.as_deref(), Some("2014-07-01T20:12:52.000Z"));

        assert_eq!(list.nodes.len(), 2);
        assert_eq!(list.nodes[0].endpoint, "10.1.18.12");
        assert_eq!(list.nodes[0].http_port, Some(80));
        assert_eq!(list.nodes[1].http_port, None);
        assert_eq!(list.nodes[1].https_port, Some(443));

        assert_eq!(list.chunks.len(), 2);
        let second = &list.chunks[1];
        assert_eq!(second.chunk_number, 1);
        assert_eq!(second.node_id, Some(list.nodes[1].id));
        assert_eq!(second.objects[0].offset, 5368709120);
        assert_eq!(second.objects[0].length, 2823290880);
        assert!(!second.objects[0].in_cache);
        assert!(second.objects[1].in_cache);
    }

    #[test]
    fn test_parse_list_without_chunks() {
        let xml = r#"<MasterObjectList BucketName="b" JobId="1a85e743-ec8f-4789-afec-97e587a26936" RequestType="PUT"><Nodes/></MasterObjectList>"#;
        let list = parse_master_object_list(xml).unwrap();
        assert!(list.chunks.is_empty());
        assert!(list.nodes.is_empty());
        assert_eq!(list.request_type, RequestType::Put);
    }

    #[test]
    fn test_parse_chunk() {
        let xml = r#"<Objects ChunkId="203f6886-b058-4f7c-a012-8779176453b1" ChunkNumber="3" NodeId="a02053b9-0147-11e4-8d6a-002590c1177c"><Object Name="client00obj000004-8000000" InCache="true" Length="5368709120" Offset="0"/></Objects>"#;
        let chunk = parse_chunk(xml).unwrap();
        assert_eq!(chunk.chunk_number, 3);
        assert_eq!(chunk.objects.len(), 1);
        assert!(chunk.objects[0].in_cache);
    }

    #[test]
    fn test_parse_jobs() {
        let xml = r#"<Jobs><Job BucketName="bucket_1" CachedSizeInBytes="69880" ChunkClientProcessingOrderGuarantee="IN_ORDER" CompletedSizeInBytes="0" JobId="0807ff11-a9f6-4d55-bb92-b452c1bb00c7" OriginalSizeInBytes="69880" Priority="NORMAL" RequestType="PUT" StartDate="2014-09-04T17:23:45.000Z" UserId="a7d3eff9-e6d2-4e37-8a0b-84e76211a18a" UserName="spectra" WriteOptimization="PERFORMANCE"><Nodes><Node EndPoint="10.10.10.10" HttpPort="80" HttpsPort="443" Id="edb8cc38-32f2-11e4-bce1-080027ecf0d4"/></Nodes></Job></Jobs>"#;
        let jobs = parse_jobs(xml).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].write_optimization, Some(WriteOptimization::Performance));
        assert_eq!(jobs[0].chunk_ordering, Some(ChunkOrdering::InOrder));
        assert_eq!(jobs[0].cached_size_in_bytes, Some(69880));
        assert_eq!(jobs[0].user_name.as_deref(), Some("spectra"));
        assert_eq!(jobs[0].nodes[0].endpoint, "10.10.10.10");
    }

    #[test]
    fn test_bulk_request_body() {
        let objects = vec![Ds3Object::with_size("file1", 256), Ds3Object::with_size("file2", 1202)];

        let put = bulk_request_body(&objects, true).unwrap();
        assert!(put.starts_with("<Objects>"));
        assert!(put.contains(r#"Name="file1""#));
        assert!(put.contains(r#"Size="1202""#));

        let get = bulk_request_body(&objects, false).unwrap();
        assert!(get.contains(r#"Name="file2""#));
        assert!(!get.contains("Size"));
    }

    #[test]
    fn test_malformed_document() {
        assert!(parse_master_object_list("<MasterObjectList>").is_err());
    }
}
