//! 목록 변환기
//!
//! 백엔드 목록 조회 결과를 엔티티 하나당 메시지 하나로 바꿔 싱크에 기록합니다.
//! 백엔드가 돌려준 순서를 유지하고, 같은 이름이 여럿이어도 모두 전달합니다.

use tracing::debug;

use crate::backend::{ContainerRecord, Filter, ImageRecord, Listing, PluginRecord, VolumeRecord};
use crate::context::CallContext;
use crate::error::{Error, ErrorKind, Result};
use crate::protocol::{
    Container, Image, ListContainersResponse, ListImagesResponse, ListPluginsResponse, ListVolumesResponse, Plugin,
    Volume,
};
use crate::sink::MessageSink;

/// 목록 메시지로 변환 가능한 백엔드 레코드
pub trait ListingRecord: Send {
    type Message: Send + 'static;

    /// 필터의 id 조건과 비교할 값
    fn id(&self) -> &str;

    /// 필터의 인스턴스 이름 조건과 비교할 값
    fn instance_name(&self) -> &str;

    fn into_message(self) -> Result<Self::Message>;
}

impl ListingRecord for ImageRecord {
    type Message = ListImagesResponse;

    fn id(&self) -> &str {
        &self.id
    }

    fn instance_name(&self) -> &str {
        &self.name
    }

    fn into_message(self) -> Result<Self::Message> {
        Ok(ListImagesResponse {
            images: vec![Image {
                id: self.id,
                name: self.name,
                tag: self.tag,
                size: self.size,
            }],
        })
    }
}

impl ListingRecord for ContainerRecord {
    type Message = ListContainersResponse;

    fn id(&self) -> &str {
        &self.id
    }

    fn instance_name(&self) -> &str {
        &self.name
    }

    fn into_message(self) -> Result<Self::Message> {
        Ok(ListContainersResponse {
            containers: vec![Container {
                id: self.id,
                instance_name: self.name,
                image_name: self.image,
                status: self.state,
                command: self.command,
                labels: self.labels,
                limits: self.limits,
            }],
        })
    }
}

impl ListingRecord for VolumeRecord {
    type Message = ListVolumesResponse;

    // 볼륨은 이름이 곧 식별자
    fn id(&self) -> &str {
        &self.name
    }

    fn instance_name(&self) -> &str {
        &self.name
    }

    fn into_message(self) -> Result<Self::Message> {
        Ok(ListVolumesResponse {
            volumes: vec![Volume {
                name: self.name,
                driver: self.driver,
                mountpoint: self.mountpoint,
                labels: self.labels,
                options: self.options,
                created: self.created_at,
            }],
        })
    }
}

impl ListingRecord for PluginRecord {
    type Message = ListPluginsResponse;

    fn id(&self) -> &str {
        &self.id
    }

    fn instance_name(&self) -> &str {
        &self.name
    }

    fn into_message(self) -> Result<Self::Message> {
        let config = canonical_json(&self.config)?;
        Ok(ListPluginsResponse {
            plugins: vec![Plugin {
                id: self.id,
                instance_name: self.name,
                config,
            }],
        })
    }
}

/// 설정 값을 정규화된 JSON 텍스트로 직렬화합니다.
///
/// 객체 키는 정렬되고 들여쓰기는 공백 두 칸입니다.
pub fn canonical_json(value: &serde_json::Value) -> Result<String> {
    serde_json::to_string_pretty(value)
        .map_err(|e| Error::new(ErrorKind::BackendInternal, format!("플러그인 설정 직렬화 실패: {}", e)))
}

/// 목록 하나를 변환해 싱크에 기록하고 보낸 메시지 수를 돌려줍니다.
///
/// 취소는 레코드 경계마다 확인합니다. 실패하면 이미 보낸 메시지는 그대로 두고
/// 에러를 돌려주며, 싱크 종료는 호출자가 처리합니다.
pub async fn translate<R, S>(ctx: &CallContext, filter: &Filter, listing: Listing<R>, sink: &mut S) -> Result<usize>
where
    R: ListingRecord,
    S: MessageSink<R::Message> + ?Sized,
{
    let Listing { records, exact } = listing;
    let total = records.len();
    let mut sent = 0;

    for record in records {
        ctx.check()?;

        if !exact && !filter.matches(record.id(), record.instance_name()) {
            continue;
        }

        sink.send(record.into_message()?).await?;
        sent += 1;
    }

    debug!(received = total, sent, exact, "목록 변환 완료");
    Ok(sent)
}
